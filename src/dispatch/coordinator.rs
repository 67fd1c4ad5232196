//! Coordinator: runs a pool of workers over one stream and one sink, fans
//! the quit signal out to each of them and collects their reports.

use super::report::Report;
use super::worker::{TerminationReason, Worker, WorkerId};
use crate::config::DispatchConfig;
use crate::error::Result;
use crate::sink::Sink;
use crate::source::DeliveryStream;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

/// Outcome of a full run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Every report any worker sent, in arrival order.
    pub reports: Vec<Report>,
    /// How each worker stopped, by worker id. Workers that panicked are
    /// absent here and present in `reports`.
    pub terminations: Vec<(WorkerId, TerminationReason)>,
}

impl RunSummary {
    /// True if no worker reported anything.
    pub fn is_clean(&self) -> bool {
        self.reports.is_empty()
    }

    /// Process exit status: 0 for a clean run, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        if self.is_clean() { 0 } else { 1 }
    }
}

/// Owns the worker pool for one run.
pub struct Coordinator {
    stream: DeliveryStream,
    sink: Arc<dyn Sink>,
    config: DispatchConfig,
}

impl Coordinator {
    pub fn new(stream: DeliveryStream, sink: Arc<dyn Sink>, config: DispatchConfig) -> Self {
        Self {
            stream,
            sink,
            config,
        }
    }

    /// Run `concurrency` workers until all of them have terminated.
    ///
    /// When `shutdown` resolves, every worker gets its own quit request. The
    /// report stream is drained concurrently and only finishes once every
    /// worker has dropped its sender, so no report is lost.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the dispatch configuration is invalid.
    pub async fn run<F>(self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()>,
    {
        self.config.validate()?;

        let run_span = info_span!(
            "dispatch.run",
            run_id = %Uuid::new_v4(),
            concurrency = self.config.concurrency,
            sink = %self.sink.describe(),
        );
        info!(
            parent: &run_span,
            concurrency = self.config.concurrency,
            idle_timeout_ms = self.config.idle_timeout.map(|d| d.as_millis() as u64),
            requeue_failed = self.config.requeue_failed,
            fail_fast = self.config.fail_fast,
            "starting workers"
        );

        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<Report>();
        let mut quit_slots = Vec::with_capacity(self.config.concurrency);
        let mut handles: Vec<(WorkerId, JoinHandle<TerminationReason>)> =
            Vec::with_capacity(self.config.concurrency);

        for n in 0..self.config.concurrency {
            let id = WorkerId(n);
            let quit = CancellationToken::new();
            let worker = Worker::new(
                id,
                self.stream.clone(),
                Arc::clone(&self.sink),
                self.config.clone(),
                report_tx.clone(),
                quit.clone(),
            );
            let span = info_span!(parent: &run_span, "dispatch.worker", worker = n);
            handles.push((id, tokio::spawn(worker.run().instrument(span))));
            quit_slots.push(quit);
        }
        // Workers hold the only senders from here on.
        drop(report_tx);
        drop(self.stream);

        let joined = async move {
            let mut terminations = Vec::with_capacity(handles.len());
            let mut panics = Vec::new();
            for (id, handle) in handles {
                match handle.await {
                    Ok(reason) => terminations.push((id, reason)),
                    Err(join_error) => panics.push(Report::worker_panic(id, join_error)),
                }
            }
            (terminations, panics)
        };

        let supervised = async move {
            tokio::pin!(joined);
            tokio::select! {
                out = &mut joined => out,
                _ = shutdown => {
                    info!(workers = quit_slots.len(), "quit requested, stopping workers");
                    for quit in &quit_slots {
                        quit.cancel();
                    }
                    joined.await
                }
            }
        };

        let drained = async move {
            let mut reports = Vec::new();
            while let Some(report) = report_rx.recv().await {
                error!(worker = %report.worker, kind = ?report.kind, "{report}");
                reports.push(report);
            }
            reports
        };

        let ((terminations, panics), mut reports) = async { tokio::join!(supervised, drained) }
            .instrument(run_span.clone())
            .await;

        for report in panics {
            error!(parent: &run_span, worker = %report.worker, kind = ?report.kind, "{report}");
            reports.push(report);
        }

        info!(
            parent: &run_span,
            reports = reports.len(),
            workers = terminations.len(),
            "all workers terminated"
        );

        Ok(RunSummary {
            reports,
            terminations,
        })
    }
}
