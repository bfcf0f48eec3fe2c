//! Client library for a remote task-automation backend.
//!
//! A task is submitted with `POST /run`; the backend answers with a
//! Server-Sent-Events stream of `status` and `log` records. `StreamRunner`
//! frames that stream into callbacks and can be cancelled; `Panel` adds the
//! single-run state machine, the transcript, and the credential store.
//!
//! # Streaming a task
//!
//! ```no_run
//! use taskpanel_core::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), PanelError> {
//! let runner = StreamRunner::http(PanelConfig::from_env()?)?;
//! let (callbacks, mut messages) = ChannelCallbacks::new();
//! let handle = runner.start("Summarize example.com", Vec::new(), callbacks);
//!
//! while let Some(message) = messages.recv().await {
//!     match message {
//!         RunMessage::Event(event) => println!("{}: {}", event.kind, event.data),
//!         RunMessage::Error(failure) => eprintln!("{failure}"),
//!         RunMessage::Done(_) => break,
//!     }
//! }
//! # let _ = handle;
//! # Ok(())
//! # }
//! ```

/// Environment-driven client configuration.
pub mod config;
/// Credential store and sanitization.
pub mod credentials;
/// Public error types.
pub mod errors;
/// Wire and state types.
pub mod model;
/// Logging setup.
pub mod observability;
/// Run controller and transcript.
pub mod panel;
/// Common imports for typical usage.
pub mod prelude;
/// Stream runner, callbacks, and cancellation handle.
pub mod run;
/// Incremental Server-Sent-Events framing.
pub mod sse;
/// Local key/value storage backends.
pub mod storage;
/// Run events and completion reasons.
pub mod stream;
/// Backend transport contract and HTTP implementation.
pub mod transport;

pub use config::PanelConfig;
pub use credentials::{CredentialPatch, CredentialStore, sanitize_credentials};
pub use errors::{PanelError, RunFailure, StorageError, TransportError};
pub use model::{Credential, CredentialPair, RunRequest, RunState};
pub use panel::{Panel, Transcript};
pub use run::{AbortHandle, ChannelCallbacks, RunCallbacks, RunHandle, RunMessage, StreamRunner};
pub use storage::{FileKvStorage, KvStorage, MemoryKvStorage};
pub use stream::{Completion, EventKind, RunEvent};
pub use transport::{ByteStream, HttpTransport, RunTransport};
