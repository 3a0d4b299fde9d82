use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::debug;

use super::{MultipartPayload, ParsedBody, Transport, TransportError};

/// reqwest-backed transport used against the real workflow engine.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(request_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| TransportError::Network {
                detail: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Read the reply body and fold the status check in, so that error
    /// replies still surface whatever diagnostic text the far end sent.
    async fn finish(response: reqwest::Response) -> Result<ParsedBody, TransportError> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransportError::Parse {
                detail: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(TransportError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(ParsedBody::from_text(text))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_json(&self, url: &str, body: &Value) -> Result<ParsedBody, TransportError> {
        debug!(url, "sending JSON request to workflow engine");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Network {
                detail: e.to_string(),
            })?;
        Self::finish(response).await
    }

    async fn send_multipart(
        &self,
        url: &str,
        payload: MultipartPayload,
    ) -> Result<ParsedBody, TransportError> {
        debug!(
            url,
            file = %payload.file_name,
            size = payload.bytes.len(),
            "sending multipart upload to workflow engine"
        );

        let file_part = Part::bytes(payload.bytes)
            .file_name(payload.file_name)
            .mime_str(&payload.content_type)
            .map_err(|e| TransportError::Parse {
                detail: format!("invalid content type: {e}"),
            })?;

        let mut form = Form::new().part("file", file_part);
        for (name, value) in payload.fields {
            form = form.text(name, value);
        }

        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Network {
                detail: e.to_string(),
            })?;
        Self::finish(response).await
    }
}
