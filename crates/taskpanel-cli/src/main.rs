//! `taskpanel`: submit a task to the automation backend and follow its log.
//!
//! Subcommands: `run` (stream a task), `stop`, `health`, `creds` (manage saved credentials).

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use taskpanel_core::config::load_env;
use taskpanel_core::observability::init_observability;
use taskpanel_core::{
    Completion, Credential, CredentialPatch, CredentialStore, FileKvStorage, Panel, PanelConfig,
    PanelError, StreamRunner,
};
use tracing::warn;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(name = "taskpanel")]
#[command(about = "Submit tasks to the automation backend and stream their progress")]
struct Args {
    /// Backend base URL (default: TASKPANEL_API_BASE_URL or http://127.0.0.1:8000)
    #[arg(long, value_name = "URL", global = true)]
    base_url: Option<String>,

    /// Storage file for saved credentials (default: TASKPANEL_STORAGE_PATH or .taskpanel/storage.json)
    #[arg(long, value_name = "PATH", global = true)]
    storage: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a task and print its transcript as it streams
    Run {
        /// Task description; words are joined with spaces
        #[arg(required = true, trailing_var_arg = true)]
        task: Vec<String>,
    },
    /// Ask the backend to stop the task it is running
    Stop,
    /// Check backend health
    Health,
    /// Manage saved credentials
    #[command(subcommand)]
    Creds(CredsCommand),
}

#[derive(Subcommand, Debug)]
enum CredsCommand {
    /// List saved credentials
    List {
        /// Print values instead of masking them
        #[arg(long)]
        show_values: bool,
        /// Print a JSON array
        #[arg(long)]
        json: bool,
    },
    /// Save a new credential
    Add { key: String, value: String },
    /// Change the key and/or value of a saved credential
    Update {
        id: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        value: Option<String>,
    },
    /// Delete a saved credential
    Remove { id: String },
}

fn resolve_config(args: &Args) -> Result<PanelConfig, PanelError> {
    let mut config = PanelConfig::from_env()?;
    if let Some(url) = &args.base_url {
        config = config.api_base_url(url.clone());
    }
    if let Some(path) = &args.storage {
        config = config.storage_path(path.clone());
    }
    config.validate()?;
    Ok(config)
}

fn mask(value: &str) -> String {
    "*".repeat(value.chars().count().min(8))
}

fn render_value(credential: &Credential, show_values: bool) -> String {
    if show_values {
        credential.value.clone()
    } else {
        mask(&credential.value)
    }
}

fn open_store(config: &PanelConfig) -> CliResult<CredentialStore<FileKvStorage>> {
    Ok(CredentialStore::load(FileKvStorage::new(
        config.storage_path.clone(),
    ))?)
}

/// What a Ctrl-C during `run` should do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Interrupt {
    Stop,
    Exit,
}

/// The first Ctrl-C asks the backend to stop; any later one exits at once.
#[derive(Debug, Default)]
struct Interrupts {
    seen: u32,
}

impl Interrupts {
    fn record(&mut self) -> Interrupt {
        self.seen = self.seen.saturating_add(1);
        if self.seen == 1 {
            Interrupt::Stop
        } else {
            Interrupt::Exit
        }
    }
}

async fn run_task(config: PanelConfig, task: &str) -> CliResult<ExitCode> {
    let store = open_store(&config)?;
    let panel = Panel::new(StreamRunner::http(config)?, store);
    let mut lines = panel.subscribe_lines();
    panel.start_run(task)?;

    let idle = panel.wait_idle();
    tokio::pin!(idle);
    let mut interrupts = Interrupts::default();
    let mut stop: Option<Pin<Box<dyn Future<Output = Result<bool, PanelError>> + '_>>> = None;
    let completion = loop {
        tokio::select! {
            Some(line) = lines.recv() => println!("{line}"),
            completion = &mut idle => break completion,
            result = async {
                match stop.as_mut() {
                    Some(pending) => pending.await,
                    None => std::future::pending().await,
                }
            } => {
                stop = None;
                if let Err(err) = result {
                    warn!(error = %err, "stop ignored");
                }
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for ctrl-c");
                    continue;
                }
                match interrupts.record() {
                    Interrupt::Stop => stop = Some(Box::pin(panel.stop_run())),
                    Interrupt::Exit => {
                        eprintln!("interrupted again, exiting");
                        return Ok(ExitCode::from(130));
                    }
                }
            }
        }
    };
    while let Ok(line) = lines.try_recv() {
        println!("{line}");
    }

    Ok(match completion {
        Some(Completion::Failed) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

fn run_creds(config: &PanelConfig, cmd: CredsCommand) -> CliResult<ExitCode> {
    let mut store = open_store(config)?;
    match cmd {
        CredsCommand::List { show_values, json } => {
            if json {
                let rows: Vec<serde_json::Value> = store
                    .list()
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "id": c.id,
                            "key": c.key,
                            "value": render_value(c, show_values),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if store.is_empty() {
                println!("No credentials saved.");
            } else {
                for c in store.list() {
                    println!("{}  {}={}", c.id, c.key, render_value(c, show_values));
                }
            }
        }
        CredsCommand::Add { key, value } => {
            let credential = store.add(key, value)?;
            println!("{}", credential.id);
        }
        CredsCommand::Update { id, key, value } => {
            let patch = CredentialPatch { key, value };
            if patch.is_empty() {
                let err = PanelError::Validation("nothing to update: pass --key or --value".into());
                return Err(err.into());
            }
            let credential = store.update(&id, patch)?;
            println!("updated {}", credential.id);
        }
        CredsCommand::Remove { id } => {
            let credential = store.remove(&id)?;
            println!("removed {} ({})", credential.id, credential.key);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn dispatch(args: Args) -> CliResult<ExitCode> {
    let config = resolve_config(&args)?;
    match args.cmd {
        Command::Run { task } => run_task(config, &task.join(" ")).await,
        Command::Stop => {
            let stopped = StreamRunner::http(config)?.request_stop().await?;
            println!("{}", if stopped { "stopped" } else { "no task was stopped" });
            Ok(ExitCode::SUCCESS)
        }
        Command::Health => {
            let healthy = StreamRunner::http(config)?.health().await?;
            println!("{}", if healthy { "ok" } else { "unhealthy" });
            Ok(if healthy {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Creds(cmd) => run_creds(&config, cmd),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    load_env();
    init_observability();
    let args = Args::parse();
    match dispatch(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
