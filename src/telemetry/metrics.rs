//! Metric instrument factories for message-dispatcher.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"message-dispatcher"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for message-dispatcher instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("message-dispatcher")
}

/// Counter: messages forwarded and accepted.
pub fn messages_forwarded() -> Counter<u64> {
    meter()
        .u64_counter("dispatcher.messages.forwarded")
        .with_description("Messages forwarded to the sink and accepted")
        .build()
}

/// Counter: messages the sink failed to take.
pub fn messages_failed() -> Counter<u64> {
    meter()
        .u64_counter("dispatcher.messages.failed")
        .with_description("Messages the sink reported as failed")
        .build()
}

/// Counter: accept or reject calls refused by the source.
/// Labels: `operation` ("accept" | "reject").
pub fn acks_failed() -> Counter<u64> {
    meter()
        .u64_counter("dispatcher.acks.failed")
        .with_description("Settle calls refused by the delivery source")
        .build()
}

/// Counter: worker terminations.
/// Labels: `reason`.
pub fn worker_terminations() -> Counter<u64> {
    meter()
        .u64_counter("dispatcher.workers.terminated")
        .with_description("Workers that reached the terminated state")
        .build()
}

/// Counter: queue-level operations (create, send, read, set_vt, archive, delete).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("dispatcher.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: sink call duration in milliseconds.
/// Labels: `outcome`.
pub fn forward_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("dispatcher.forward.duration_ms")
        .with_description("Sink call duration in milliseconds")
        .with_unit("ms")
        .build()
}
