//! # message-dispatcher
//!
//! Consumes messages from a durable queue and forwards each one to an HTTP
//! endpoint or a unix socket with a bounded pool of concurrent workers.
//!
//! Provides the dispatch core (workers + coordinator), delivery sources
//! (pgmq and in-memory), sinks (HTTP and unix socket), and OpenTelemetry
//! observability.

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod sink;
pub mod source;
pub mod telemetry;
