use std::path::PathBuf;
use std::time::Duration;

use crate::errors::PanelError;

/// Backend address used when `TASKPANEL_API_BASE_URL` is unset.
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
/// Local storage file used when `TASKPANEL_STORAGE_PATH` is unset.
pub const DEFAULT_STORAGE_PATH: &str = ".taskpanel/storage.json";
/// Connect timeout for the HTTP client. The stream itself is never timed out.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Whole-request timeout for `/stop`, so a hung backend cannot hold up a stop.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

const API_BASE_URL_ENV: &str = "TASKPANEL_API_BASE_URL";
const STORAGE_PATH_ENV: &str = "TASKPANEL_STORAGE_PATH";
const CONNECT_TIMEOUT_ENV: &str = "TASKPANEL_CONNECT_TIMEOUT_SECS";
const STOP_TIMEOUT_ENV: &str = "TASKPANEL_STOP_TIMEOUT_SECS";

/// Loads `.env` from the current directory (if present) into the process
/// environment.
pub fn load_env() {
    dotenvy::dotenv().ok();
}

/// Client configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PanelConfig {
    /// Base URL of the task backend (`/run`, `/stop`, `/health` live under it).
    pub api_base_url: String,
    /// File backing the local key/value storage.
    pub storage_path: PathBuf,
    /// TCP connect timeout for backend requests.
    pub connect_timeout: Duration,
    /// Timeout for the whole `/stop` request.
    pub stop_timeout: Duration,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }
}

impl PanelConfig {
    /// Builds a config from `TASKPANEL_*` environment variables, falling back
    /// to defaults for anything unset or blank.
    pub fn from_env() -> Result<Self, PanelError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PanelError> {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let mut config = Self::default();
        if let Some(url) = read(API_BASE_URL_ENV) {
            config.api_base_url = url.trim().to_string();
        }
        if let Some(path) = read(STORAGE_PATH_ENV) {
            config.storage_path = PathBuf::from(path.trim());
        }
        if let Some(raw) = read(CONNECT_TIMEOUT_ENV) {
            config.connect_timeout = parse_secs(CONNECT_TIMEOUT_ENV, &raw)?;
        }
        if let Some(raw) = read(STOP_TIMEOUT_ENV) {
            config.stop_timeout = parse_secs(STOP_TIMEOUT_ENV, &raw)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Overrides the backend base URL.
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Overrides the storage file path.
    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Overrides the `/stop` request timeout.
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Checks that the base URL is an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), PanelError> {
        let url = self.api_base_url.trim();
        if url.is_empty() {
            return Err(PanelError::Config("api base url must not be empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(PanelError::Config(format!(
                "api base url must start with http:// or https://, got {url:?}"
            )));
        }
        Ok(())
    }

    /// Joins an endpoint path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_base_url.trim().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

fn parse_secs(name: &str, raw: &str) -> Result<Duration, PanelError> {
    raw.trim()
        .parse()
        .map(Duration::from_secs)
        .map_err(|_| PanelError::Config(format!("{name} must be whole seconds, got {raw:?}")))
}
