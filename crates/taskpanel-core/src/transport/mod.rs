//! Backend transport contract and its HTTP implementation.
//!
//! The runner only sees `RunTransport`, so tests can drive it with in-memory
//! byte streams.
mod http;

use std::pin::Pin;

pub use http::HttpTransport;

use crate::errors::TransportError;
use crate::model::RunRequest;

/// Response body of a run, as raw byte chunks in arrival order.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// Calls the task backend exposes.
#[async_trait::async_trait]
pub trait RunTransport: Send + Sync {
    /// Submits a task and returns the streaming response body.
    ///
    /// Implementations fail with `TransportError::Http` for non-success
    /// statuses and `TransportError::MissingBody` when there is nothing to
    /// stream.
    async fn open_run(&self, request: &RunRequest) -> Result<ByteStream, TransportError>;

    /// Asks the backend to stop the task it is running.
    ///
    /// Returns `Ok(false)` when the backend answers with a non-success status
    /// or reports that nothing was stopped.
    async fn request_stop(&self) -> Result<bool, TransportError>;

    /// Returns whether the backend reports itself healthy.
    async fn health(&self) -> Result<bool, TransportError>;
}
