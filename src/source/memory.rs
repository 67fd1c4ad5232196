//! In-process delivery source.
//!
//! Feeds messages straight into a [`DeliveryStream`] and records every
//! settle call in an [`AckLog`]. Used by tests and by callers that embed the
//! dispatcher behind their own producer.

use super::{Acknowledger, Delivery, DeliveryProducer, DeliveryStream, Message};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Accepted,
    Rejected { requeue: bool },
}

#[derive(Debug, Default)]
struct AckState {
    settled: Mutex<BTreeMap<u64, Vec<Settlement>>>,
    fail_accept: AtomicBool,
    fail_reject: AtomicBool,
}

/// Shared record of settle calls, keyed by the id `push` returned.
#[derive(Debug, Clone, Default)]
pub struct AckLog {
    state: Arc<AckState>,
}

impl AckLog {
    /// Every settle call made for a message, in call order.
    pub fn settlements(&self, id: u64) -> Vec<Settlement> {
        self.lock().get(&id).cloned().unwrap_or_default()
    }

    pub fn accepted(&self) -> usize {
        self.count(|s| matches!(s, Settlement::Accepted))
    }

    pub fn rejected(&self) -> usize {
        self.count(|s| matches!(s, Settlement::Rejected { .. }))
    }

    /// Number of distinct messages settled at least once.
    pub fn settled_messages(&self) -> usize {
        self.lock().len()
    }

    /// Make subsequent `accept` calls fail after being recorded.
    pub fn fail_accepts(&self, fail: bool) {
        self.state.fail_accept.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `reject` calls fail after being recorded.
    pub fn fail_rejects(&self, fail: bool) {
        self.state.fail_reject.store(fail, Ordering::SeqCst);
    }

    fn count(&self, pred: impl Fn(&Settlement) -> bool) -> usize {
        self.lock().values().flatten().filter(|&s| pred(s)).count()
    }

    fn record(&self, id: u64, settlement: Settlement) {
        self.lock().entry(id).or_default().push(settlement);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<u64, Vec<Settlement>>> {
        // A poisoned log still holds valid settlements.
        self.state
            .settled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct MemoryAcker {
    id: u64,
    log: AckLog,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn accept(self: Box<Self>) -> Result<()> {
        self.log.record(self.id, Settlement::Accepted);
        if self.log.state.fail_accept.load(Ordering::SeqCst) {
            return Err(Error::Acknowledge(format!(
                "accept of message {} refused by source",
                self.id
            )));
        }
        Ok(())
    }

    async fn reject(self: Box<Self>, requeue: bool) -> Result<()> {
        self.log.record(self.id, Settlement::Rejected { requeue });
        if self.log.state.fail_reject.load(Ordering::SeqCst) {
            return Err(Error::Acknowledge(format!(
                "reject of message {} refused by source",
                self.id
            )));
        }
        Ok(())
    }
}

/// Producer half of an in-memory stream.
pub struct MemorySource {
    producer: DeliveryProducer,
    log: AckLog,
    next_id: AtomicU64,
}

impl MemorySource {
    /// Create a source and the stream its workers read from.
    pub fn new(capacity: usize) -> (Self, DeliveryStream) {
        let (producer, stream) = DeliveryStream::bounded(capacity);
        let source = Self {
            producer,
            log: AckLog::default(),
            next_id: AtomicU64::new(0),
        };
        (source, stream)
    }

    pub fn ack_log(&self) -> AckLog {
        self.log.clone()
    }

    /// Enqueue a message and return the id its settlements are logged under.
    pub async fn push(&self, message: Message) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let acker = MemoryAcker {
            id,
            log: self.log.clone(),
        };
        self.producer
            .send(Delivery::new(message, acker))
            .await
            .map_err(|_| Error::Other("delivery stream has no consumers".to_string()))?;
        Ok(id)
    }

    /// Close the stream. Workers drain what is buffered, then stop.
    pub fn close(&self) {
        self.producer.close();
    }
}
