//! Run controller: the single-run state machine, the transcript, and the
//! start/stop orchestration a front end drives.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::credentials::CredentialStore;
use crate::errors::{PanelError, RunFailure};
use crate::model::RunState;
use crate::run::{RunCallbacks, RunHandle, StreamRunner};
use crate::storage::KvStorage;
use crate::stream::{Completion, EventKind, RunEvent};

/// Ordered, append-only log lines of the current run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transcript {
    lines: Vec<String>,
}

impl Transcript {
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Renders a run event the way it appears in the transcript.
pub fn format_event(event: &RunEvent) -> String {
    match event.kind {
        EventKind::Status => format!("[status] {}", event.data),
        EventKind::Log => event.data.clone(),
    }
}

struct Shared {
    state_tx: watch::Sender<RunState>,
    transcript: Transcript,
    listener: Option<mpsc::UnboundedSender<String>>,
    handle: Option<RunHandle>,
    // Bumped per run so callbacks of an older run can never touch a newer one.
    generation: u64,
    stream_done: bool,
    stop_done: bool,
    last_completion: Option<Completion>,
}

impl Shared {
    fn state(&self) -> RunState {
        *self.state_tx.borrow()
    }

    fn set_state(&mut self, state: RunState) {
        self.state_tx.send_replace(state);
    }

    fn append(&mut self, line: String) {
        if let Some(listener) = &self.listener
            && listener.send(line.clone()).is_err()
        {
            self.listener = None;
        }
        self.transcript.push(line);
    }

    /// `stopping → idle` needs both the stop call and the stream to be over.
    fn settle(&mut self) {
        match self.state() {
            RunState::Running if self.stream_done => self.set_state(RunState::Idle),
            RunState::Stopping if self.stream_done && self.stop_done => {
                self.set_state(RunState::Idle)
            }
            _ => {}
        }
        if self.state() == RunState::Idle {
            self.handle = None;
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

struct PanelCallbacks {
    shared: Arc<Mutex<Shared>>,
    generation: u64,
}

impl PanelCallbacks {
    fn with_current(&self, f: impl FnOnce(&mut Shared)) {
        let mut shared = lock(&self.shared);
        if shared.generation == self.generation {
            f(&mut *shared);
        }
    }
}

impl RunCallbacks for PanelCallbacks {
    fn on_event(&mut self, event: RunEvent) {
        self.with_current(|shared| shared.append(format_event(&event)));
    }

    fn on_error(&mut self, failure: RunFailure) {
        self.with_current(|shared| shared.append(format!("[error] {failure}")));
    }

    fn on_done(&mut self, completion: Completion) {
        self.with_current(|shared| {
            shared.stream_done = true;
            shared.last_completion = Some(completion);
            shared.settle();
        });
    }
}

/// Closes the stop leg of a `Stopping` panel when dropped: aborts the stream
/// and marks the stop call as done, whether or not the call returned.
struct FinishStop {
    shared: Arc<Mutex<Shared>>,
    handle: Option<RunHandle>,
}

impl Drop for FinishStop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        let mut shared = lock(&self.shared);
        shared.stop_done = true;
        shared.settle();
    }
}

/// Owns one run at a time plus the credentials sent with it.
pub struct Panel<S> {
    runner: StreamRunner,
    credentials: Mutex<CredentialStore<S>>,
    shared: Arc<Mutex<Shared>>,
    state_rx: watch::Receiver<RunState>,
}

impl<S: KvStorage> Panel<S> {
    pub fn new(runner: StreamRunner, credentials: CredentialStore<S>) -> Self {
        let (state_tx, state_rx) = watch::channel(RunState::Idle);
        Self {
            runner,
            credentials: Mutex::new(credentials),
            shared: Arc::new(Mutex::new(Shared {
                state_tx,
                transcript: Transcript::default(),
                listener: None,
                handle: None,
                generation: 0,
                stream_done: false,
                stop_done: false,
                last_completion: None,
            })),
            state_rx,
        }
    }

    pub fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    pub fn can_run(&self) -> bool {
        self.state() == RunState::Idle
    }

    pub fn can_stop(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Snapshot of the transcript lines.
    pub fn transcript(&self) -> Vec<String> {
        lock(&self.shared).transcript.lines().to_vec()
    }

    pub fn clear_transcript(&self) {
        lock(&self.shared).transcript.clear();
    }

    /// Completion of the most recent run, once it has ended.
    pub fn last_completion(&self) -> Option<Completion> {
        lock(&self.shared).last_completion
    }

    /// Streams every line appended from now on. Replaces any earlier listener.
    pub fn subscribe_lines(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.shared).listener = Some(tx);
        rx
    }

    /// Runs `f` against the credential store.
    pub fn with_credentials<R>(&self, f: impl FnOnce(&mut CredentialStore<S>) -> R) -> R {
        let mut store = self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut *store)
    }

    /// Starts a run for `task` with the stored credentials.
    ///
    /// Only allowed while idle. Clears the transcript first.
    pub fn start_run(&self, task: &str) -> Result<RunHandle, PanelError> {
        let task = task.trim();
        if task.is_empty() {
            return Err(PanelError::Validation("task must not be empty".into()));
        }
        let (credentials, preview) =
            self.with_credentials(|store| (store.sanitized(), store.preview()));

        let mut shared = lock(&self.shared);
        let state = shared.state();
        if state != RunState::Idle {
            return Err(PanelError::InvalidState {
                action: "start a run",
                state,
            });
        }

        shared.generation += 1;
        shared.stream_done = false;
        shared.stop_done = false;
        shared.last_completion = None;
        shared.set_state(RunState::Running);
        shared.transcript.clear();
        shared.append(format!("Starting task: {task}"));
        shared.append(preview);

        let callbacks = PanelCallbacks {
            shared: self.shared.clone(),
            generation: shared.generation,
        };
        let handle = self.runner.start(task, credentials, callbacks);
        info!(run_id = %handle.run_id(), "panel run started");
        shared.handle = Some(handle.clone());
        Ok(handle)
    }

    /// Stops the current run.
    ///
    /// Calls the backend stop endpoint, then cancels the local stream whatever
    /// the outcome. A failed stop call is written to the transcript rather
    /// than returned. Returns whether the backend acknowledged the stop.
    ///
    /// Dropping the returned future before it resolves still cancels the
    /// stream and completes the stop, so the panel cannot stay `Stopping`.
    pub async fn stop_run(&self) -> Result<bool, PanelError> {
        let finish = {
            let mut shared = lock(&self.shared);
            let state = shared.state();
            if state != RunState::Running {
                return Err(PanelError::InvalidState {
                    action: "stop",
                    state,
                });
            }
            shared.set_state(RunState::Stopping);
            shared.append("Stopping...".to_string());
            FinishStop {
                shared: self.shared.clone(),
                handle: shared.handle.clone(),
            }
        };

        let stopped = match self.runner.request_stop().await {
            Ok(stopped) => stopped,
            Err(err) => {
                warn!(error = %err, "stop request failed");
                lock(&self.shared).append(format!("[error] {err}"));
                false
            }
        };
        drop(finish);
        Ok(stopped)
    }

    /// Waits until the panel is idle again and returns how the last run ended.
    pub async fn wait_idle(&self) -> Option<Completion> {
        let mut rx = self.state_rx.clone();
        // The sender lives in `self.shared`, so it cannot be dropped while
        // `self` is borrowed.
        let _ = rx.wait_for(|state| *state == RunState::Idle).await;
        self.last_completion()
    }
}
