use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::PanelConfig;
use crate::errors::{PanelError, RunFailure, TransportError};
use crate::model::{CredentialPair, RunRequest};
use crate::sse::SseDecoder;
use crate::stream::{Completion, EventKind, RunEvent};
use crate::transport::{HttpTransport, RunTransport};

/// Receives the output of a single run.
///
/// All three methods are called from the runner's task, in stream order.
/// `on_error` is called at most once and is always followed by
/// `on_done(Completion::Failed)`; `on_done` is called exactly once.
pub trait RunCallbacks: Send + 'static {
    /// A framed record of type `status` or `log`.
    fn on_event(&mut self, event: RunEvent);
    /// The run terminated abnormally. Never called for cancellation.
    fn on_error(&mut self, failure: RunFailure);
    /// The run is over.
    fn on_done(&mut self, completion: Completion);
}

/// Everything a run reports, as one message type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMessage {
    Event(RunEvent),
    Error(RunFailure),
    Done(Completion),
}

/// `RunCallbacks` that forwards every callback into an unbounded channel.
#[derive(Clone, Debug)]
pub struct ChannelCallbacks {
    tx: mpsc::UnboundedSender<RunMessage>,
}

impl ChannelCallbacks {
    /// Creates the callbacks and the receiving end of their channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RunCallbacks for ChannelCallbacks {
    fn on_event(&mut self, event: RunEvent) {
        let _ = self.tx.send(RunMessage::Event(event));
    }

    fn on_error(&mut self, failure: RunFailure) {
        let _ = self.tx.send(RunMessage::Error(failure));
    }

    fn on_done(&mut self, completion: Completion) {
        let _ = self.tx.send(RunMessage::Done(completion));
    }
}

/// Handle used to request cancellation of a running stream.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The read loop observes it at its next suspension point and finishes
    /// with `Completion::Cancelled`. Has no effect once the run has ended.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }
}

/// Handle to a started run.
///
/// Dropping the handle does not cancel the run.
#[derive(Clone, Debug)]
pub struct RunHandle {
    run_id: uuid::Uuid,
    abort: AbortHandle,
    done_rx: watch::Receiver<Option<Completion>>,
}

impl RunHandle {
    /// Returns the id used for this run in logs.
    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    /// Cancels the run. See `AbortHandle::abort`.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Returns a cloneable cancellation handle.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Returns the completion if the run has already ended.
    pub fn completion(&self) -> Option<Completion> {
        *self.done_rx.borrow()
    }

    /// Waits until `on_done` has been called and returns its completion.
    pub async fn wait(&self) -> Completion {
        let mut rx = self.done_rx.clone();
        match rx.wait_for(Option::is_some).await {
            Ok(done) => {
                let completion = *done;
                completion.unwrap_or(Completion::Failed)
            }
            // Runner task went away without reporting (it panicked).
            Err(_) => Completion::Failed,
        }
    }
}

/// Submits tasks and frames their SSE responses into callbacks.
#[derive(Clone)]
pub struct StreamRunner {
    transport: Arc<dyn RunTransport>,
}

impl StreamRunner {
    /// Creates a runner over any transport.
    pub fn new(transport: Arc<dyn RunTransport>) -> Self {
        Self { transport }
    }

    /// Creates a runner talking HTTP to the configured backend.
    pub fn http(config: PanelConfig) -> Result<Self, PanelError> {
        Ok(Self::new(Arc::new(HttpTransport::new(config)?)))
    }

    /// Starts a run on the current tokio runtime.
    ///
    /// Never fails synchronously: request and stream failures are reported
    /// through `callbacks`. The caller is responsible for trimming and
    /// validating `task` and for sanitizing `credentials`.
    pub fn start(
        &self,
        task: impl Into<String>,
        credentials: Vec<CredentialPair>,
        callbacks: impl RunCallbacks,
    ) -> RunHandle {
        let request = RunRequest {
            task: task.into(),
            credentials,
        };
        let run_id = uuid::Uuid::new_v4();
        let (abort_tx, abort_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(None);

        info!(run_id = %run_id, credentials = request.credentials.len(), "starting run");
        tokio::spawn(run_task(
            self.transport.clone(),
            run_id,
            request,
            callbacks,
            abort_rx,
            done_tx,
        ));

        RunHandle {
            run_id,
            abort: AbortHandle { tx: abort_tx },
            done_rx,
        }
    }

    /// Asks the backend to stop its current task. Independent of any stream.
    pub async fn request_stop(&self) -> Result<bool, TransportError> {
        self.transport.request_stop().await
    }

    /// Checks backend health.
    pub async fn health(&self) -> Result<bool, TransportError> {
        self.transport.health().await
    }
}

async fn run_task<C: RunCallbacks>(
    transport: Arc<dyn RunTransport>,
    run_id: uuid::Uuid,
    request: RunRequest,
    mut callbacks: C,
    abort_rx: watch::Receiver<bool>,
    done_tx: watch::Sender<Option<Completion>>,
) {
    let completion = drive_stream(transport.as_ref(), run_id, &request, &mut callbacks, abort_rx).await;
    match completion {
        Completion::Completed => info!(run_id = %run_id, "run completed"),
        Completion::Cancelled => info!(run_id = %run_id, "run cancelled"),
        Completion::Failed => warn!(run_id = %run_id, "run failed"),
    }
    callbacks.on_done(completion);
    done_tx.send_replace(Some(completion));
}

async fn drive_stream<C: RunCallbacks>(
    transport: &dyn RunTransport,
    run_id: uuid::Uuid,
    request: &RunRequest,
    callbacks: &mut C,
    abort_rx: watch::Receiver<bool>,
) -> Completion {
    let aborted = wait_for_abort(abort_rx);
    tokio::pin!(aborted);

    let opened = tokio::select! {
        biased;
        _ = &mut aborted => return Completion::Cancelled,
        opened = transport.open_run(request) => opened,
    };
    let mut body = match opened {
        Ok(body) => body,
        Err(err) => {
            warn!(run_id = %run_id, error = %err, "run request failed");
            callbacks.on_error(err.into());
            return Completion::Failed;
        }
    };

    let mut decoder = SseDecoder::default();
    let mut seq = 0_u64;
    loop {
        let next = tokio::select! {
            biased;
            _ = &mut aborted => return Completion::Cancelled,
            next = body.next() => next,
        };
        match next {
            Some(Ok(chunk)) => {
                for frame in decoder.push_chunk(&chunk) {
                    let Some(kind) = EventKind::from_event_type(&frame.event) else {
                        debug!(run_id = %run_id, event_type = %frame.event, "dropping unhandled event type");
                        continue;
                    };
                    debug!(run_id = %run_id, seq, %kind, "run event");
                    seq = seq.saturating_add(1);
                    callbacks.on_event(RunEvent {
                        kind,
                        data: frame.data,
                    });
                }
            }
            Some(Err(err)) => {
                warn!(run_id = %run_id, error = %err, "run stream failed");
                callbacks.on_error(err.into());
                return Completion::Failed;
            }
            None => {
                let dropped = decoder.finish();
                if dropped > 0 {
                    debug!(run_id = %run_id, dropped, "discarding unterminated trailing record");
                }
                return Completion::Completed;
            }
        }
    }
}

/// Resolves once cancellation is requested. Pends forever if every abort
/// handle is dropped without aborting.
async fn wait_for_abort(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ByteStream;
    use bytes::Bytes;
    use futures::StreamExt as _;
    use futures::stream;
    use std::sync::Mutex;

    enum FakeBehavior {
        Chunks(Vec<Result<Bytes, TransportError>>),
        ChunksThenPending(Vec<Result<Bytes, TransportError>>),
        OpenError(TransportError),
        PendingOpen,
    }

    struct FakeTransport {
        behavior: FakeBehavior,
        requests: Mutex<Vec<RunRequest>>,
    }

    impl FakeTransport {
        fn new(behavior: FakeBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl RunTransport for FakeTransport {
        async fn open_run(&self, request: &RunRequest) -> Result<ByteStream, TransportError> {
            self.requests.lock().expect("lock").push(request.clone());
            match &self.behavior {
                FakeBehavior::Chunks(chunks) => Ok(Box::pin(stream::iter(chunks.clone()))),
                FakeBehavior::ChunksThenPending(chunks) => Ok(Box::pin(
                    stream::iter(chunks.clone()).chain(stream::pending()),
                )),
                FakeBehavior::OpenError(err) => Err(err.clone()),
                FakeBehavior::PendingOpen => std::future::pending().await,
            }
        }

        async fn request_stop(&self) -> Result<bool, TransportError> {
            Ok(true)
        }

        async fn health(&self) -> Result<bool, TransportError> {
            Ok(true)
        }
    }

    fn chunk(text: &str) -> Result<Bytes, TransportError> {
        Ok(Bytes::copy_from_slice(text.as_bytes()))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RunMessage>) -> Vec<RunMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn delivers_events_in_order_then_completes() {
        let transport = FakeTransport::new(FakeBehavior::Chunks(vec![
            chunk("event: status\ndata: starting\n\nevent: lo"),
            chunk("g\ndata: step 1\n\ndata: no type\n\n"),
            chunk("event: status\ndata: exit:0\n\n"),
        ]));
        let runner = StreamRunner::new(transport.clone());
        let (callbacks, mut rx) = ChannelCallbacks::new();

        let handle = runner.start(
            "open the site",
            vec![CredentialPair::new("EMAIL", "a@b.c")],
            callbacks,
        );
        assert_eq!(handle.wait().await, Completion::Completed);

        assert_eq!(
            drain(&mut rx),
            vec![
                RunMessage::Event(RunEvent::status("starting")),
                RunMessage::Event(RunEvent::log("step 1")),
                RunMessage::Event(RunEvent::status("exit:0")),
                RunMessage::Done(Completion::Completed),
            ]
        );
        let requests = transport.requests.lock().expect("lock");
        assert_eq!(
            requests.as_slice(),
            &[RunRequest {
                task: "open the site".into(),
                credentials: vec![CredentialPair::new("EMAIL", "a@b.c")],
            }]
        );
    }

    #[tokio::test]
    async fn non_success_status_reports_one_error_then_done() {
        let transport = FakeTransport::new(FakeBehavior::OpenError(TransportError::http(
            500,
            "boom",
        )));
        let (callbacks, mut rx) = ChannelCallbacks::new();
        let handle = StreamRunner::new(transport).start("t", Vec::new(), callbacks);

        assert_eq!(handle.wait().await, Completion::Failed);
        assert_eq!(
            drain(&mut rx),
            vec![
                RunMessage::Error(RunFailure::Http {
                    status: 500,
                    message: "boom".into()
                }),
                RunMessage::Done(Completion::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn missing_body_is_a_failure() {
        let transport = FakeTransport::new(FakeBehavior::OpenError(TransportError::MissingBody));
        let (callbacks, mut rx) = ChannelCallbacks::new();
        let handle = StreamRunner::new(transport).start("t", Vec::new(), callbacks);

        assert_eq!(handle.wait().await, Completion::Failed);
        assert_eq!(
            drain(&mut rx),
            vec![
                RunMessage::Error(RunFailure::MissingBody),
                RunMessage::Done(Completion::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn read_failure_after_events_reports_error() {
        let transport = FakeTransport::new(FakeBehavior::Chunks(vec![
            chunk("event: log\ndata: before\n\n"),
            Err(TransportError::transport("connection reset")),
            chunk("event: log\ndata: never\n\n"),
        ]));
        let (callbacks, mut rx) = ChannelCallbacks::new();
        let handle = StreamRunner::new(transport).start("t", Vec::new(), callbacks);

        assert_eq!(handle.wait().await, Completion::Failed);
        assert_eq!(
            drain(&mut rx),
            vec![
                RunMessage::Event(RunEvent::log("before")),
                RunMessage::Error(RunFailure::Transport {
                    message: "connection reset".into()
                }),
                RunMessage::Done(Completion::Failed),
            ]
        );
    }

    #[tokio::test]
    async fn unterminated_trailing_record_is_discarded() {
        let transport = FakeTransport::new(FakeBehavior::Chunks(vec![chunk(
            "event: log\ndata: a\n\nevent: log\ndata: b",
        )]));
        let (callbacks, mut rx) = ChannelCallbacks::new();
        let handle = StreamRunner::new(transport).start("t", Vec::new(), callbacks);

        assert_eq!(handle.wait().await, Completion::Completed);
        assert_eq!(
            drain(&mut rx),
            vec![
                RunMessage::Event(RunEvent::log("a")),
                RunMessage::Done(Completion::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn abort_mid_stream_finishes_cancelled_without_error() {
        let transport = FakeTransport::new(FakeBehavior::ChunksThenPending(vec![chunk(
            "event: log\ndata: first\n\n",
        )]));
        let (callbacks, mut rx) = ChannelCallbacks::new();
        let handle = StreamRunner::new(transport).start("t", Vec::new(), callbacks);

        assert_eq!(
            rx.recv().await,
            Some(RunMessage::Event(RunEvent::log("first")))
        );
        handle.abort();

        assert_eq!(handle.wait().await, Completion::Cancelled);
        assert_eq!(drain(&mut rx), vec![RunMessage::Done(Completion::Cancelled)]);
    }

    #[tokio::test]
    async fn abort_while_request_is_pending() {
        let transport = FakeTransport::new(FakeBehavior::PendingOpen);
        let (callbacks, mut rx) = ChannelCallbacks::new();
        let handle = StreamRunner::new(transport).start("t", Vec::new(), callbacks);
        handle.abort_handle().abort();

        assert_eq!(handle.wait().await, Completion::Cancelled);
        assert_eq!(drain(&mut rx), vec![RunMessage::Done(Completion::Cancelled)]);
    }

    #[tokio::test]
    async fn abort_after_completion_is_a_no_op() {
        let transport = FakeTransport::new(FakeBehavior::Chunks(vec![chunk(
            "event: status\ndata: done\n\n",
        )]));
        let (callbacks, mut rx) = ChannelCallbacks::new();
        let handle = StreamRunner::new(transport).start("t", Vec::new(), callbacks);

        assert_eq!(handle.wait().await, Completion::Completed);
        handle.abort();
        tokio::task::yield_now().await;

        assert_eq!(handle.completion(), Some(Completion::Completed));
        let done_count = drain(&mut rx)
            .into_iter()
            .filter(|m| matches!(m, RunMessage::Done(_)))
            .count();
        assert_eq!(done_count, 1);
    }

    #[tokio::test]
    async fn dropping_the_handle_does_not_cancel() {
        let transport = FakeTransport::new(FakeBehavior::Chunks(vec![chunk(
            "event: log\ndata: kept\n\n",
        )]));
        let (callbacks, mut rx) = ChannelCallbacks::new();
        drop(StreamRunner::new(transport).start("t", Vec::new(), callbacks));

        let mut messages = Vec::new();
        while let Some(message) = rx.recv().await {
            messages.push(message);
        }
        assert_eq!(
            messages,
            vec![
                RunMessage::Event(RunEvent::log("kept")),
                RunMessage::Done(Completion::Completed),
            ]
        );
    }
}
