//! Worker: pulls deliveries off the shared stream, forwards them through
//! the sink and settles them with the source.
//!
//! ```text
//! Waiting -> Forwarding -> Settling -> Waiting
//!    |                        |
//!    +--------> Terminated <--+
//! ```
//!
//! Quit and idle timeout are only observed while `Waiting`; a delivery that
//! has been taken off the stream is always forwarded and settled first.

use super::report::Report;
use crate::config::DispatchConfig;
use crate::sink::Sink;
use crate::source::{Acknowledger, Delivery, DeliveryStream, Message};
use crate::telemetry::dispatch::{record_outcome, record_state_transition, start_delivery_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info};

/// Index of a worker within its coordinator, `0..concurrency`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub usize);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Waiting,
    Forwarding,
    Settling,
    Terminated,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Forwarding => "forwarding",
            Self::Settling => "settling",
            Self::Terminated => "terminated",
        }
    }
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    StreamClosed,
    IdleTimeout,
    QuitSignal,
    AckFailure,
    FailFastOnForwardFailure,
}

impl TerminationReason {
    /// Whether stopping for this reason is itself reported. Fail-fast is
    /// not: the forward failure that caused it already was.
    pub fn is_reported(self) -> bool {
        matches!(self, Self::QuitSignal | Self::AckFailure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::StreamClosed => "stream_closed",
            Self::IdleTimeout => "idle_timeout",
            Self::QuitSignal => "quit_signal",
            Self::AckFailure => "ack_failure",
            Self::FailFastOnForwardFailure => "fail_fast",
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What ended a wait.
enum Wake {
    Delivery(Delivery),
    Closed,
    Idle,
    Quit,
}

pub struct Worker {
    id: WorkerId,
    stream: DeliveryStream,
    sink: Arc<dyn Sink>,
    config: DispatchConfig,
    reports: mpsc::UnboundedSender<Report>,
    quit: CancellationToken,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        stream: DeliveryStream,
        sink: Arc<dyn Sink>,
        config: DispatchConfig,
        reports: mpsc::UnboundedSender<Report>,
        quit: CancellationToken,
    ) -> Self {
        Self {
            id,
            stream,
            sink,
            config,
            reports,
            quit,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Process deliveries until one of the termination conditions is met.
    pub async fn run(self) -> TerminationReason {
        debug!(worker = %self.id, "worker started");
        let reason = self.run_loop().await;

        metrics::worker_terminations().add(1, &[KeyValue::new("reason", reason.as_str())]);
        info!(worker = %self.id, %reason, "worker terminated");
        reason
    }

    async fn run_loop(&self) -> TerminationReason {
        loop {
            let delivery = match self.wait().await {
                Wake::Delivery(delivery) => delivery,
                Wake::Closed => return TerminationReason::StreamClosed,
                Wake::Idle => return TerminationReason::IdleTimeout,
                Wake::Quit => {
                    self.report(Report::signal_termination(self.id));
                    return TerminationReason::QuitSignal;
                }
            };

            if let Some(reason) = self.process(delivery).await {
                return reason;
            }
        }
    }

    /// Block until a delivery arrives, the stream closes, the idle timer
    /// fires or quit is requested. The idle timer restarts on every wait.
    async fn wait(&self) -> Wake {
        let idle = self.config.idle_timeout;
        tokio::select! {
            biased;
            _ = self.quit.cancelled() => Wake::Quit,
            next = self.stream.next() => match next {
                Some(delivery) => Wake::Delivery(delivery),
                None => Wake::Closed,
            },
            _ = tokio::time::sleep(idle.unwrap_or_default()), if idle.is_some() => Wake::Idle,
        }
    }

    /// Forward and settle one delivery. Returns a reason if the worker must
    /// stop afterwards.
    async fn process(&self, delivery: Delivery) -> Option<TerminationReason> {
        let span = start_delivery_span(self.id, &self.sink.describe());
        let (message, acker) = delivery.into_parts();

        record_state_transition(&span, WorkerState::Waiting, WorkerState::Forwarding);
        let started = Instant::now();
        let outcome = self.sink.forward(&message).instrument(span.clone()).await;
        metrics::forward_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("outcome", if outcome.is_ok() { "success" } else { "failure" })],
        );
        record_state_transition(&span, WorkerState::Forwarding, WorkerState::Settling);

        let next = match outcome {
            Ok(()) => {
                record_outcome(&span, "success");
                self.settle_accept(acker, &message).instrument(span.clone()).await
            }
            Err(error) => {
                record_outcome(&span, "failure");
                metrics::messages_failed().add(1, &[]);
                self.report(Report::forward_failure(self.id, &error, &message));
                self.settle_reject(acker, &message).instrument(span.clone()).await
            }
        };

        let to = match next {
            Some(_) => WorkerState::Terminated,
            None => WorkerState::Waiting,
        };
        record_state_transition(&span, WorkerState::Settling, to);
        next
    }

    async fn settle_accept(
        &self,
        acker: Box<dyn Acknowledger>,
        message: &Message,
    ) -> Option<TerminationReason> {
        match acker.accept().await {
            Ok(()) => {
                metrics::messages_forwarded().add(1, &[]);
                None
            }
            Err(error) => {
                // The sink has the message but the source may not know it.
                metrics::acks_failed().add(1, &[KeyValue::new("operation", "accept")]);
                self.report(Report::acknowledgment_failure(self.id, &error, message));
                Some(TerminationReason::AckFailure)
            }
        }
    }

    async fn settle_reject(
        &self,
        acker: Box<dyn Acknowledger>,
        message: &Message,
    ) -> Option<TerminationReason> {
        if let Err(error) = acker.reject(self.config.requeue_failed).await {
            metrics::acks_failed().add(1, &[KeyValue::new("operation", "reject")]);
            self.report(Report::reject_failure(self.id, &error, message));
        }

        self.config
            .fail_fast
            .then_some(TerminationReason::FailFastOnForwardFailure)
    }

    fn report(&self, report: Report) {
        // The coordinator holds the receiver until every worker has stopped.
        let _ = self.reports.send(report);
    }
}
