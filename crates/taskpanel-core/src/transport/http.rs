use futures::TryStreamExt as _;
use reqwest::StatusCode;
use tracing::debug;

use crate::config::PanelConfig;
use crate::errors::{PanelError, TransportError};
use crate::model::{HealthResponse, RunRequest, StopResponse};

use super::{ByteStream, RunTransport};

/// `RunTransport` backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: PanelConfig,
}

impl HttpTransport {
    /// Creates a transport for the configured backend.
    pub fn new(config: PanelConfig) -> Result<Self, PanelError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| PanelError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Returns the backend base URL.
    pub fn base_url(&self) -> &str {
        &self.config.api_base_url
    }
}

#[async_trait::async_trait]
impl RunTransport for HttpTransport {
    async fn open_run(&self, request: &RunRequest) -> Result<ByteStream, TransportError> {
        let url = self.config.endpoint("run");
        debug!(%url, credentials = request.credentials.len(), "submitting task");

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::transport(format!("run request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::http(
                status.as_u16(),
                error_message(status, &body),
            ));
        }
        if status == StatusCode::NO_CONTENT {
            return Err(TransportError::MissingBody);
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| TransportError::transport(format!("stream read failed: {e}")));
        Ok(Box::pin(stream))
    }

    async fn request_stop(&self) -> Result<bool, TransportError> {
        let url = self.config.endpoint("stop");
        let response = self
            .client
            .post(&url)
            .timeout(self.config.stop_timeout)
            .send()
            .await
            .map_err(|e| TransportError::transport(format!("stop request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            debug!(%url, %status, "stop request not acknowledged");
            return Ok(false);
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::transport(format!("stop response read failed: {e}")))?;
        let parsed: StopResponse = serde_json::from_slice(&body)
            .map_err(|e| TransportError::protocol(format!("malformed stop response: {e}")))?;
        Ok(parsed.stopped.unwrap_or(false))
    }

    async fn health(&self) -> Result<bool, TransportError> {
        let url = self.config.endpoint("health");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::transport(format!("health request failed: {e}")))?;

        if !response.status().is_success() {
            return Ok(false);
        }
        let parsed: HealthResponse = response
            .json()
            .await
            .map_err(|e| TransportError::protocol(format!("malformed health response: {e}")))?;
        Ok(parsed.status.as_deref() == Some("ok"))
    }
}

/// Builds a readable message for a rejected request.
///
/// The backend reports rejections as `{"detail": "..."}`; other bodies are
/// passed through, and an empty body falls back to the status reason.
fn error_message(status: StatusCode, body: &str) -> String {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("detail")?.as_str().map(ToOwned::to_owned));
    match detail {
        Some(detail) => detail,
        None if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        None => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_json_detail() {
        assert_eq!(
            error_message(StatusCode::CONFLICT, r#"{"detail":"Task already running"}"#),
            "Task already running"
        );
    }

    #[test]
    fn error_message_falls_back_to_body_then_reason() {
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, " upstream down \n"),
            "upstream down"
        );
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, ""),
            "Internal Server Error"
        );
        assert_eq!(
            error_message(StatusCode::UNPROCESSABLE_ENTITY, r#"{"detail":[{"msg":"x"}]}"#),
            r#"{"detail":[{"msg":"x"}]}"#
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        let err = HttpTransport::new(PanelConfig::default().api_base_url("ftp://nope"))
            .expect_err("invalid url");
        assert!(matches!(err, PanelError::Config(_)));
    }
}
