use std::fmt;

/// Event types the runner delivers. Every other SSE event type is dropped.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Status,
    Log,
}

impl EventKind {
    /// Maps an SSE `event:` value onto a deliverable kind.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "status" => Some(Self::Status),
            "log" => Some(Self::Log),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Log => "log",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One framed and classified SSE record.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: String,
}

impl RunEvent {
    pub fn status(data: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Status,
            data: data.into(),
        }
    }

    pub fn log(data: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Log,
            data: data.into(),
        }
    }
}

/// Why a run ended. Passed exactly once to `RunCallbacks::on_done`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Completion {
    /// The response body reached end-of-stream.
    Completed,
    /// The run failed; `on_error` was called first.
    Failed,
    /// The caller aborted the run.
    Cancelled,
}
