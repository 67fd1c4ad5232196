//! Unix socket sink: one fresh connection per message.

use super::Sink;
use crate::error::ForwardError;
use crate::source::Message;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;

/// Writes each message body to a local stream socket.
///
/// Holds no connection state, so it is safe to share between workers. The
/// content type is not transmitted.
#[derive(Debug, Clone)]
pub struct SocketSink {
    path: PathBuf,
}

impl SocketSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sink for SocketSink {
    async fn forward(&self, message: &Message) -> std::result::Result<(), ForwardError> {
        let mut stream = UnixStream::connect(&self.path)
            .await
            .map_err(ForwardError::Connect)?;

        // The connection closes when `stream` drops, whatever the outcome.
        stream
            .write_all(&message.body)
            .await
            .map_err(ForwardError::Write)?;
        stream.shutdown().await.map_err(ForwardError::Write)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}
