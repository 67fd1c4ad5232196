//! Sinks: where forwarded messages go.
//!
//! One sink instance is shared by every worker, so implementations must be
//! safe for concurrent use. Neither variant retries; failures flow back to
//! the worker's reject path.

mod http;
mod socket;

pub use self::http::{HttpSink, HttpSinkConfig};
pub use self::socket::SocketSink;

use crate::config::Destination;
use crate::error::{ForwardError, Result};
use crate::source::Message;
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait Sink: Send + Sync {
    /// Deliver one message. `Ok(())` is a successful forward.
    async fn forward(&self, message: &Message) -> std::result::Result<(), ForwardError>;

    /// Short label for logs and spans.
    fn describe(&self) -> String;
}

/// Build the sink a destination selects.
pub fn from_destination(destination: &Destination) -> Result<Arc<dyn Sink>> {
    let sink: Arc<dyn Sink> = match destination {
        Destination::Http(url) => Arc::new(HttpSink::new(url.clone(), HttpSinkConfig::default())?),
        Destination::UnixSocket(path) => Arc::new(SocketSink::new(path.clone())),
    };
    Ok(sink)
}
