//! Delivery source backed by a pgmq queue.
//!
//! A single pump task reads the queue one message at a time and pushes each
//! into the shared [`DeliveryStream`]. Settling maps onto pgmq:
//!
//! - accept deletes the message
//! - reject with requeue resets its visibility timeout to zero
//! - reject without requeue archives it, keeping a record of the failure
//!
//! A delivery dropped without being settled, whether unsent by the pump or
//! still buffered when the last worker leaves, resets its visibility timeout
//! to zero.

use super::{Acknowledger, Delivery, DeliveryProducer, DeliveryStream, Message};
use crate::db::Db;
use crate::db::pgmq::PgmqMessage;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Configuration for the pgmq pump.
#[derive(Debug, Clone)]
pub struct PgmqSourceConfig {
    pub queue: String,
    /// Visibility timeout (seconds) for pgmq reads. A message not settled
    /// within this window becomes visible to other consumers again.
    pub visibility_timeout: i32,
    /// How long to wait before polling an empty queue again.
    pub poll_interval: Duration,
}

impl PgmqSourceConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            visibility_timeout: 60,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Explicit envelope for a queued message.
#[derive(Debug, Deserialize)]
struct Envelope {
    body: String,
    content_type: Option<String>,
}

/// Map a pgmq payload onto a message.
///
/// `{"body": "...", "content_type": "..."}` is unwrapped. Anything else is
/// forwarded as its JSON text.
pub fn message_from_payload(payload: &serde_json::Value) -> Message {
    match Envelope::deserialize(payload) {
        Ok(envelope) => Message::new(
            envelope.body,
            envelope
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        ),
        Err(_) => Message::new(payload.to_string(), "application/json"),
    }
}

/// Build the pgmq payload for a message body. Inverse of
/// [`message_from_payload`] for UTF-8 bodies.
pub fn payload_for(body: &str, content_type: &str) -> serde_json::Value {
    serde_json::json!({ "body": body, "content_type": content_type })
}

/// Settles one pgmq message. Dropping it unsettled puts the message straight
/// back on the queue instead of leaving it hidden until its visibility
/// timeout runs out.
struct PgmqAcker {
    db: Db,
    queue: String,
    msg_id: i64,
    settled: bool,
    releases: TaskTracker,
}

impl PgmqAcker {
    fn missing(&self) -> Error {
        Error::Acknowledge(format!(
            "message {} no longer in queue {:?}",
            self.msg_id, self.queue
        ))
    }
}

#[async_trait]
impl Acknowledger for PgmqAcker {
    async fn accept(mut self: Box<Self>) -> Result<()> {
        self.settled = true;
        if !self.db.delete_message(&self.queue, self.msg_id).await? {
            return Err(self.missing());
        }
        Ok(())
    }

    async fn reject(mut self: Box<Self>, requeue: bool) -> Result<()> {
        self.settled = true;
        let found = if requeue {
            self.db.set_visibility(&self.queue, self.msg_id, 0).await?
        } else {
            self.db.archive_message(&self.queue, self.msg_id).await?
        };
        if !found {
            return Err(self.missing());
        }
        Ok(())
    }
}

impl Drop for PgmqAcker {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let msg_id = self.msg_id;
        let Ok(handle) = Handle::try_current() else {
            warn!(msg_id, "no runtime left to release unsettled message");
            return;
        };
        let db = self.db.clone();
        let queue = std::mem::take(&mut self.queue);
        self.releases.spawn_on(
            async move {
                match db.set_visibility(&queue, msg_id, 0).await {
                    Ok(true) => debug!(msg_id, "released unsettled message"),
                    Ok(false) => debug!(msg_id, "unsettled message already gone"),
                    Err(e) => warn!(msg_id, "failed to release unsettled message: {e}"),
                }
            },
            &handle,
        );
    }
}

/// Pumps a pgmq queue into a delivery stream.
pub struct PgmqSource {
    db: Db,
    config: PgmqSourceConfig,
    producer: DeliveryProducer,
    shutdown: CancellationToken,
    releases: TaskTracker,
}

impl PgmqSource {
    /// Create the pump and the stream workers consume.
    ///
    /// The stream buffers a single message so the pump never holds more than
    /// one read-ahead message under its visibility timeout.
    pub fn new(
        db: Db,
        config: PgmqSourceConfig,
        shutdown: CancellationToken,
    ) -> (Self, DeliveryStream) {
        let (producer, stream) = DeliveryStream::bounded(1);
        (
            Self {
                db,
                config,
                producer,
                shutdown,
                releases: TaskTracker::new(),
            },
            stream,
        )
    }

    /// Run the pump on its own task.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Read until shut down or until every consumer is gone, then close the
    /// stream. Returns once every message dropped unsettled so far has been
    /// released back to the queue.
    pub async fn run(self) {
        info!(queue = %self.config.queue, "pgmq source started");

        loop {
            if self.producer.is_closed() {
                debug!(queue = %self.config.queue, "all consumers gone");
                break;
            }

            let read = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                read = self.db.read_from_queue(&self.config.queue, self.config.visibility_timeout) => read,
            };

            match read {
                Ok(Some(msg)) => {
                    if !self.hand_off(msg).await {
                        break;
                    }
                }
                Ok(None) => self.idle().await,
                Err(e) => {
                    warn!(queue = %self.config.queue, "queue read error: {e}, retrying");
                    self.idle().await;
                }
            }
        }

        let Self {
            config,
            producer,
            releases,
            ..
        } = self;
        producer.close();
        // Frees a read-ahead message still buffered when no consumer is left.
        drop(producer);
        releases.close();
        releases.wait().await;
        info!(queue = %config.queue, "pgmq source stopped");
    }

    /// Push one message to the workers. Returns false if the pump should
    /// stop; the unsent delivery is dropped and so released to the queue.
    async fn hand_off(&self, msg: PgmqMessage) -> bool {
        debug!(msg_id = msg.msg_id, read_ct = msg.read_ct, "read message");
        let delivery = Delivery::new(
            message_from_payload(&msg.message),
            PgmqAcker {
                db: self.db.clone(),
                queue: self.config.queue.clone(),
                msg_id: msg.msg_id,
                settled: false,
                releases: self.releases.clone(),
            },
        );

        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            sent = self.producer.send(delivery) => sent.is_ok(),
        }
    }

    async fn idle(&self) {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_payload_is_unwrapped() {
        let msg = message_from_payload(&json!({"body": "ping", "content_type": "text/plain"}));
        assert_eq!(msg, Message::new("ping", "text/plain"));
    }

    #[test]
    fn envelope_without_content_type_defaults_to_octet_stream() {
        let msg = message_from_payload(&json!({"body": "ping"}));
        assert_eq!(msg.content_type, "application/octet-stream");
    }

    #[test]
    fn other_payloads_are_forwarded_as_json() {
        let msg = message_from_payload(&json!({"order": 42}));
        assert_eq!(msg.content_type, "application/json");
        assert_eq!(&msg.body[..], br#"{"order":42}"#);
    }

    #[test]
    fn payload_for_round_trips_through_envelope() {
        let payload = payload_for("hello", "text/plain");
        assert_eq!(
            message_from_payload(&payload),
            Message::new("hello", "text/plain")
        );
    }
}
