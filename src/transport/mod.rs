//! Outbound transport for workflow engine calls.
//!
//! The orchestrator never learns which relay carries a request (direct
//! call, CORS proxy, backend-forwarding function); it sees a single
//! `Transport` contract that either yields a parsed body or a typed
//! failure. Nothing panics across this boundary.

pub mod client;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use client::HttpTransport;

/// Transport-level failure, split the way the orchestrator's log lines
/// and retry affordances need it: could not reach the server at all,
/// reached it but got a non-success status, or could not read the body.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("could not reach server: {detail}")]
    Network { detail: String },

    /// The far end answered outside 200-299. The body text it sent is
    /// kept for logging.
    #[error("server returned status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("could not read response body: {detail}")]
    Parse { detail: String },
}

/// A successful (2xx) reply. `json` is `None` when the body did not parse
/// as JSON; the raw text is always kept either way.
#[derive(Debug, Clone)]
pub struct ParsedBody {
    pub json: Option<Value>,
    pub text: String,
}

impl ParsedBody {
    pub fn from_text(text: String) -> Self {
        let json = serde_json::from_str(&text).ok();
        Self { json, text }
    }
}

/// Multipart upload payload: one binary file part plus form text fields.
#[derive(Debug, Clone)]
pub struct MultipartPayload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub fields: Vec<(String, String)>,
}

/// One outbound call to a given address.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_json(&self, url: &str, body: &Value) -> Result<ParsedBody, TransportError>;

    async fn send_multipart(
        &self,
        url: &str,
        payload: MultipartPayload,
    ) -> Result<ParsedBody, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parsed_body_keeps_raw_text_for_json() {
        let body = ParsedBody::from_text(r#"{"resumeUrl":"https://x/r1"}"#.to_string());
        assert_eq!(body.json, Some(json!({"resumeUrl": "https://x/r1"})));
        assert!(body.text.contains("resumeUrl"));
    }

    #[test]
    fn parsed_body_tolerates_non_json_text() {
        let body = ParsedBody::from_text("<html>tunnel offline</html>".to_string());
        assert!(body.json.is_none());
        assert_eq!(body.text, "<html>tunnel offline</html>");
    }
}
