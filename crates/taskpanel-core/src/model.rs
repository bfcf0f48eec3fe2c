use std::fmt;

/// Lifecycle of the single run a panel may own at a time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Stopping,
}

impl RunState {
    /// Returns the lowercase state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A locally stored credential.
///
/// `id` only exists client-side; the backend receives `CredentialPair`.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Credential {
    pub id: String,
    pub key: String,
    pub value: String,
}

impl Credential {
    /// Creates a credential with a fresh random id.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Wire form of a credential sent with a run request.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CredentialPair {
    pub key: String,
    pub value: String,
}

impl CredentialPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// JSON body of `POST /run`.
#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunRequest {
    pub task: String,
    pub credentials: Vec<CredentialPair>,
}

/// JSON body returned by `POST /stop`.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StopResponse {
    #[serde(default)]
    pub stopped: Option<bool>,
}

/// JSON body returned by `GET /health`.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_request_serializes_without_credential_ids() {
        let request = RunRequest {
            task: "open the site".into(),
            credentials: vec![CredentialPair::new("EMAIL", "a@b.c")],
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "task": "open the site",
                "credentials": [{"key": "EMAIL", "value": "a@b.c"}]
            })
        );
    }

    #[test]
    fn stop_response_tolerates_missing_field() {
        let parsed: StopResponse = serde_json::from_str("{}").expect("parse");
        assert_eq!(parsed.stopped, None);
    }

    #[test]
    fn credentials_get_distinct_ids() {
        let a = Credential::new("A", "1");
        let b = Credential::new("A", "1");
        assert_ne!(a.id, b.id);
    }
}
