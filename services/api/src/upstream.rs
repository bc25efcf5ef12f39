//! Forwarding of admitted requests to the text-generation provider.

use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Upstream request timed out")]
    Timeout,
    #[error("Upstream request failed: {0}")]
    Request(#[source] reqwest::Error),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Request(err)
        }
    }
}

/// Status and JSON body relayed back from the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamReply {
    pub status: u16,
    pub body: Value,
}

pub struct Upstream {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

impl Upstream {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            url: url.into(),
            api_key: api_key.into(),
        })
    }

    /// POSTs `body` with bearer authentication and returns whatever came back.
    pub async fn forward(&self, body: &Value) -> Result<UpstreamReply, UpstreamError> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        debug!(status, bytes = text.len(), "Upstream replied");
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(UpstreamReply { status, body })
    }
}
