//! Reports: the error records workers send to the coordinator.

use super::worker::WorkerId;
use crate::source::Message;

/// What a report is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// The sink did not take the message.
    ForwardFailure,
    /// The source refused a reject call.
    RejectFailure,
    /// The source refused an accept call. Fatal for the worker.
    AcknowledgmentFailure,
    /// The worker stopped on an operator quit request.
    SignalTermination,
    /// The worker task panicked.
    WorkerPanic,
}

/// A failure or termination record, with enough context to replay the
/// message by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub worker: WorkerId,
    pub kind: ReportKind,
    pub detail: String,
    /// Body of the message involved, if any.
    pub body: Option<String>,
}

impl Report {
    pub fn forward_failure(worker: WorkerId, error: impl std::fmt::Display, message: &Message) -> Self {
        Self::with_message(worker, ReportKind::ForwardFailure, error.to_string(), message)
    }

    pub fn reject_failure(worker: WorkerId, error: impl std::fmt::Display, message: &Message) -> Self {
        Self::with_message(
            worker,
            ReportKind::RejectFailure,
            format!("error rejecting message: {error}"),
            message,
        )
    }

    pub fn acknowledgment_failure(
        worker: WorkerId,
        error: impl std::fmt::Display,
        message: &Message,
    ) -> Self {
        Self::with_message(
            worker,
            ReportKind::AcknowledgmentFailure,
            format!("error acknowledging message: {error}"),
            message,
        )
    }

    pub fn signal_termination(worker: WorkerId) -> Self {
        Self {
            worker,
            kind: ReportKind::SignalTermination,
            detail: "stopped by quit signal".to_string(),
            body: None,
        }
    }

    pub fn worker_panic(worker: WorkerId, error: impl std::fmt::Display) -> Self {
        Self {
            worker,
            kind: ReportKind::WorkerPanic,
            detail: format!("worker panicked: {error}"),
            body: None,
        }
    }

    fn with_message(worker: WorkerId, kind: ReportKind, detail: String, message: &Message) -> Self {
        Self {
            worker,
            kind,
            detail,
            body: Some(message.body_lossy()),
        }
    }
}

impl std::fmt::Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(worker: {}) {}", self.worker, self.detail)?;
        if let Some(ref body) = self.body {
            write!(f, ". Delivery message: {body:?}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Report {}
