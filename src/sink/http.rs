//! HTTP sink: POST each message to a fixed endpoint.

use super::Sink;
use crate::error::{ForwardError, Result};
use crate::source::Message;
use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::debug;

/// Configuration for the HTTP client.
#[derive(Debug, Clone)]
pub struct HttpSinkConfig {
    /// Overall timeout per request.
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("message-dispatcher/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Forwards messages as HTTP POST requests.
///
/// Holds one pooled `reqwest::Client`; clones of the client share the pool,
/// so concurrent `forward` calls are safe.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    url: Url,
}

impl HttpSink {
    pub fn new(url: Url, config: HttpSinkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Sink for HttpSink {
    async fn forward(&self, message: &Message) -> std::result::Result<(), ForwardError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, message.content_type.as_str())
            .body(message.body.clone())
            .send()
            .await
            .map_err(|e| ForwardError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        // Dropping the response releases the connection; the body is unused.
        drop(response);

        if !(200..=299).contains(&status) {
            return Err(ForwardError::Status(status));
        }
        debug!(status, url = %self.url, "forwarded");
        Ok(())
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}
