//! Typed configuration.
//!
//! Connection settings come from environment variables and are loaded once at
//! startup, failing fast if required vars are missing. The database URL is
//! wrapped in `secrecy::SecretString` so it never leaks into logs.
//!
//! Dispatch settings are fixed for the lifetime of a run.

use crate::error::{Error, Result};
use reqwest::Url;
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

pub use secrecy::ExposeSecret;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Per-run worker policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Number of workers consuming the shared stream.
    pub concurrency: usize,
    /// How long a waiting worker tolerates an empty stream before it exits.
    /// `None` disables idle shutdown.
    pub idle_timeout: Option<Duration>,
    /// Ask the source to redeliver messages the sink failed to take.
    pub requeue_failed: bool,
    /// Stop a worker after its first forward failure.
    pub fail_fast: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            idle_timeout: None,
            requeue_failed: false,
            fail_fast: false,
        }
    }
}

impl DispatchConfig {
    /// Set the idle timeout. A zero duration disables idle shutdown.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Where forwarded messages go, resolved once from the destination URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Http(Url),
    UnixSocket(PathBuf),
}

impl Destination {
    /// Resolve a destination URI.
    ///
    /// `http` and `https` select the HTTP sink. `unix` selects the socket sink
    /// with the path taken from the URI (`unix:/run/app.sock`,
    /// `unix:///run/app.sock` or `unix:app.sock`).
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri)
            .map_err(|e| Error::Config(format!("invalid destination uri {uri:?}: {e}")))?;

        match url.scheme() {
            "http" | "https" => Ok(Self::Http(url)),
            "unix" => {
                let path = url.path();
                if path.is_empty() {
                    return Err(Error::Config(format!(
                        "destination uri {uri:?} has no socket path"
                    )));
                }
                Ok(Self::UnixSocket(PathBuf::from(path)))
            }
            other => Err(Error::Config(format!(
                "unsupported destination scheme {other:?} in {uri:?}"
            ))),
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http(url) => write!(f, "{url}"),
            Self::UnixSocket(path) => write!(f, "unix:{}", path.display()),
        }
    }
}
