//! Delivery span helpers.
//!
//! Provides span creation and state-transition recording for deliveries
//! flowing through a worker.

use crate::dispatch::{WorkerId, WorkerState};
use tracing::Span;

/// Start a span for one delivery handled by `worker`.
///
/// The `dispatch.outcome` field is declared empty and filled via
/// [`record_outcome`].
pub fn start_delivery_span(worker: WorkerId, sink: &str) -> Span {
    tracing::info_span!(
        "dispatch.deliver",
        "dispatch.worker" = worker.0,
        "dispatch.sink" = sink,
        "dispatch.outcome" = tracing::field::Empty,
    )
}

/// Record a worker state transition as a debug event on the span.
pub fn record_state_transition(span: &Span, from: WorkerState, to: WorkerState) {
    span.in_scope(|| {
        tracing::debug!(from = from.as_str(), to = to.as_str(), "state_transition");
    });
}

/// Record whether the sink took the message.
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("dispatch.outcome", outcome);
}
