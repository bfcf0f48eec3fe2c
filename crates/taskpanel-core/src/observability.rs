use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

static INIT: OnceCell<()> = OnceCell::new();

/// Targets that a bare `TASKPANEL_LOG_LEVEL` applies to. Everything else
/// (reqwest, hyper, ...) stays at `warn`.
const PANEL_TARGETS: [&str; 2] = ["taskpanel_core", "taskpanel_cli"];
const BARE_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Console rendering selected by `TASKPANEL_LOG_FORMAT`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Some(Self::Compact),
            "pretty" => Some(Self::Pretty),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

fn parse_bool_env(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

/// Expands a bare level such as `debug` into a directive scoped to the panel
/// crates. Full directives are passed through unchanged.
fn level_directive(level: &str) -> String {
    let level = level.trim();
    if !BARE_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        return level.to_string();
    }
    let mut directive = String::from("warn");
    for target in PANEL_TARGETS {
        directive.push_str(&format!(",{target}={level}"));
    }
    directive
}

fn resolve_env_filter(level: Option<&str>) -> EnvFilter {
    if let Some(level) = level
        && let Ok(filter) = EnvFilter::try_new(level_directive(level))
    {
        return filter;
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
}

/// Initialize logging once per process.
///
/// Environment variables:
/// - `TASKPANEL_OBSERVABILITY_ENABLED`: optional enable/disable flag (default enabled).
/// - `TASKPANEL_LOG_LEVEL`: a bare level (`debug`) applies to the panel crates only;
///   anything else is used as a full filter directive.
/// - `TASKPANEL_LOG_FORMAT`: console format, `compact` (default), `pretty` or `json`.
/// - `TASKPANEL_JSON_LOG_PATH`: if set, logs are JSONL in that file instead of the console.
/// - `RUST_LOG`: fallback filter when `TASKPANEL_LOG_LEVEL` is unset.
///
/// Console output goes to stderr; stdout belongs to the transcript.
pub fn init_observability() {
    INIT.get_or_init(|| {
        let enabled = std::env::var("TASKPANEL_OBSERVABILITY_ENABLED")
            .ok()
            .and_then(|value| parse_bool_env(&value))
            .unwrap_or(true);
        if !enabled {
            return;
        }

        let env_filter = resolve_env_filter(std::env::var("TASKPANEL_LOG_LEVEL").ok().as_deref());
        if let Ok(path_raw) = std::env::var("TASKPANEL_JSON_LOG_PATH") {
            let path = std::path::PathBuf::from(path_raw);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let _ = std::fs::create_dir_all(dir);
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("taskpanel.logs.jsonl");
            let writer = tracing_appender::rolling::never(dir, file_name);
            let json_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_writer(writer);
            let _ = tracing_subscriber::registry()
                .with(env_filter)
                .with(json_layer)
                .try_init();
            return;
        }

        let format = std::env::var("TASKPANEL_LOG_FORMAT")
            .ok()
            .and_then(|value| LogFormat::parse(&value))
            .unwrap_or_default();
        let registry = tracing_subscriber::registry().with(env_filter);
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr);
        let _ = match format {
            LogFormat::Compact => registry.with(layer.compact()).try_init(),
            LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
            LogFormat::Json => registry.with(layer.json()).try_init(),
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_boolean_spellings() {
        assert_eq!(parse_bool_env(" Yes "), Some(true));
        assert_eq!(parse_bool_env("off"), Some(false));
        assert_eq!(parse_bool_env("maybe"), None);
    }

    #[test]
    fn bare_level_is_scoped_to_panel_crates() {
        assert_eq!(
            level_directive(" debug "),
            "warn,taskpanel_core=debug,taskpanel_cli=debug"
        );
        assert_eq!(level_directive("reqwest=trace"), "reqwest=trace");
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::parse("JSON"), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("pretty"), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse("fancy"), None);
        assert_eq!(LogFormat::default(), LogFormat::Compact);
    }

    #[test]
    fn init_is_idempotent() {
        init_observability();
        init_observability();
    }
}
