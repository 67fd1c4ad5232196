//! Error types for message-dispatcher.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Acknowledge(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a sink could not deliver a message.
///
/// This is the failure arm of a forward outcome; success is `Ok(())`.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("{0}")]
    Transport(String),

    #[error("received {0} HTTP response when forwarding message")]
    Status(u16),

    #[error("error connecting to socket: {0}")]
    Connect(#[source] std::io::Error),

    #[error("error forwarding message to socket: {0}")]
    Write(#[source] std::io::Error),
}
