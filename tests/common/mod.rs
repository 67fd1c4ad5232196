//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use message_dispatcher::config::DispatchConfig;
use message_dispatcher::dispatch::{Report, TerminationReason, Worker, WorkerId};
use message_dispatcher::error::ForwardError;
use message_dispatcher::sink::Sink;
use message_dispatcher::source::{DeliveryStream, Message};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Sink that fails for a chosen set of bodies and records every call.
#[derive(Default)]
pub struct ScriptedSink {
    failing: HashSet<Bytes>,
    fail_all: bool,
    calls: Mutex<Vec<Bytes>>,
}

impl ScriptedSink {
    pub fn succeeding() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_all: true,
            ..Default::default()
        })
    }

    pub fn failing_on(bodies: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            failing: bodies.iter().map(|b| Bytes::from_static(b.as_bytes())).collect(),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<Bytes> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sink for ScriptedSink {
    async fn forward(&self, message: &Message) -> Result<(), ForwardError> {
        self.calls.lock().unwrap().push(message.body.clone());
        if self.fail_all || self.failing.contains(&message.body) {
            return Err(ForwardError::Status(500));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Sink that parks every call until released.
#[derive(Default)]
pub struct GatedSink {
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl Sink for GatedSink {
    async fn forward(&self, _message: &Message) -> Result<(), ForwardError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }

    fn describe(&self) -> String {
        "gated".to_string()
    }
}

/// Sink that panics on every call.
pub struct PanickingSink;

#[async_trait]
impl Sink for PanickingSink {
    async fn forward(&self, _message: &Message) -> Result<(), ForwardError> {
        panic!("sink blew up");
    }

    fn describe(&self) -> String {
        "panicking".to_string()
    }
}

pub fn text(body: &'static str) -> Message {
    Message::new(body, "text/plain")
}

/// A worker running on its own task, with handles to its report stream and
/// quit slot.
pub struct RunningWorker {
    pub handle: JoinHandle<TerminationReason>,
    pub reports: mpsc::UnboundedReceiver<Report>,
    pub quit: CancellationToken,
}

impl RunningWorker {
    /// Wait for the worker to stop and collect everything it reported.
    pub async fn finish(mut self) -> (TerminationReason, Vec<Report>) {
        let reason = self.handle.await.expect("worker panicked");
        let mut reports = Vec::new();
        while let Some(report) = self.reports.recv().await {
            reports.push(report);
        }
        (reason, reports)
    }
}

pub fn spawn_worker(
    stream: DeliveryStream,
    sink: Arc<dyn Sink>,
    config: DispatchConfig,
) -> RunningWorker {
    let (tx, reports) = mpsc::unbounded_channel();
    let quit = CancellationToken::new();
    let worker = Worker::new(WorkerId(0), stream, sink, config, tx, quit.clone());
    RunningWorker {
        handle: tokio::spawn(worker.run()),
        reports,
        quit,
    }
}
