use crate::model::RunState;

/// Errors returned by a transport before they are normalized into a
/// terminal `RunFailure`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Backend answered with a non-success HTTP status.
    #[error("backend returned status {status}: {message}")]
    Http { status: u16, message: String },
    /// Connection, DNS, or stream I/O failed.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// Backend accepted the run but sent no response body.
    #[error("backend response has no body")]
    MissingBody,
    /// Response body could not be understood (for example malformed JSON).
    #[error("protocol error: {message}")]
    Protocol { message: String },
}

impl TransportError {
    /// Creates an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a protocol-level error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

/// Terminal run failure delivered through `RunCallbacks::on_error`.
///
/// Cancellation is deliberately absent: an aborted run finishes with
/// `Completion::Cancelled` and never reaches the error callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum RunFailure {
    /// `/run` answered with a non-success status.
    #[error("run failed with status {status}: {message}")]
    Http { status: u16, message: String },
    /// Network or stream transport failed.
    #[error("transport failure: {message}")]
    Transport { message: String },
    /// `/run` succeeded without a readable body.
    #[error("run response has no body")]
    MissingBody,
    /// Backend sent something the client could not interpret.
    #[error("protocol failure: {message}")]
    Protocol { message: String },
}

impl From<TransportError> for RunFailure {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::Http { status, message } => RunFailure::Http { status, message },
            TransportError::Transport { message } => RunFailure::Transport { message },
            TransportError::MissingBody => RunFailure::MissingBody,
            TransportError::Protocol { message } => RunFailure::Protocol { message },
        }
    }
}

/// Errors raised by the local key/value storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage io error ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Top-level error type for the panel API.
#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid user input (for example an empty task).
    #[error("validation error: {0}")]
    Validation(String),
    /// Operation is not allowed from the current run state.
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: RunState,
    },
    /// No credential exists with the given id.
    #[error("credential not found: {0}")]
    CredentialNotFound(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
