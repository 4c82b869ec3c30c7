//! Blocking HTTP client the acquisition loop uses to hand readings to the
//! ingestion API. Uses `ureq` (no async); short timeouts so a stalled
//! service can never hold a cadence tick hostage.

use std::time::Duration;

use serde::Deserialize;

use crate::models::telemetry::Reading;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum IngestClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_json::Error),
}

impl core::fmt::Display for IngestClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            IngestClientError::Transport(s) => write!(f, "transport error: {}", s),
            IngestClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            IngestClientError::Json(e) => write!(f, "json error: {}", e),
        }
    }
}

impl std::error::Error for IngestClientError {}

impl From<serde_json::Error> for IngestClientError {
    fn from(value: serde_json::Error) -> Self {
        IngestClientError::Json(value)
    }
}

/// Acknowledgement returned by `POST /readings`.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestAck {
    pub id: i32,
}

pub struct IngestClient {
    agent: ureq::Agent,
    base_url: String,
}

impl IngestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(REQUEST_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build();
        let base_url = base_url.into().trim_end_matches('/').to_string();
        IngestClient { agent, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn post_reading(&self, reading: &Reading) -> Result<IngestAck, IngestClientError> {
        let url = format!("{}/readings", self.base_url);
        let body = serde_json::to_value(reading)?;
        match self.agent.post(&url).set("Accept", "application/json").send_json(body) {
            Ok(res) => serde_json::from_reader(res.into_reader()).map_err(IngestClientError::Json),
            Err(ureq::Error::Transport(t)) => Err(IngestClientError::Transport(t.to_string())),
            Err(ureq::Error::Status(status, res)) => {
                let message = res.into_string().unwrap_or_else(|_| String::from("<no body>"));
                Err(IngestClientError::Http { status, message })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_normalized_away() {
        let client = IngestClient::new("http://localhost:8000/");
        assert_eq!(client.base_url(), "http://localhost:8000");
    }

    #[test]
    fn unreachable_endpoint_surfaces_as_transport_error() {
        // Reserved TEST-NET-1 address, nothing listens there.
        let client = IngestClient::new("http://192.0.2.1:1");
        let reading = Reading::empty(chrono::Utc::now());
        match client.post_reading(&reading) {
            Err(IngestClientError::Transport(_)) => {}
            other => panic!("expected transport error, got {:?}", other.map(|a| a.id)),
        }
    }
}
