//! Delivery sources: where messages come from and how they are settled.
//!
//! A source pushes [`Delivery`] values into a [`DeliveryStream`]. Every worker
//! holds a clone of the stream; the channel hands each delivery to exactly
//! one of them. Dropping every [`DeliveryProducer`] closes the stream.

pub mod memory;
pub mod pgmq;

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// A message body plus its content type. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: Bytes,
    pub content_type: String,
}

impl Message {
    pub fn new(body: impl Into<Bytes>, content_type: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
        }
    }

    /// The body as text, for reports and logs.
    pub fn body_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Settles a single delivery with the source.
///
/// Both methods consume the acknowledger, so a delivery is settled at most
/// once and never both accepted and rejected.
#[async_trait]
pub trait Acknowledger: Send {
    async fn accept(self: Box<Self>) -> Result<()>;

    async fn reject(self: Box<Self>, requeue: bool) -> Result<()>;
}

/// A message on loan from the source, together with its settle handle.
pub struct Delivery {
    pub message: Message,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(message: Message, acker: impl Acknowledger + 'static) -> Self {
        Self {
            message,
            acker: Box::new(acker),
        }
    }

    pub async fn accept(self) -> Result<()> {
        self.acker.accept().await
    }

    pub async fn reject(self, requeue: bool) -> Result<()> {
        self.acker.reject(requeue).await
    }

    /// Split into the message and the settle handle.
    pub fn into_parts(self) -> (Message, Box<dyn Acknowledger>) {
        (self.message, self.acker)
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Consumer side of the shared delivery stream.
#[derive(Debug, Clone)]
pub struct DeliveryStream {
    rx: async_channel::Receiver<Delivery>,
}

/// Producer side of the shared delivery stream.
#[derive(Debug, Clone)]
pub struct DeliveryProducer {
    tx: async_channel::Sender<Delivery>,
}

impl DeliveryStream {
    /// Create a stream holding at most `capacity` undelivered messages.
    pub fn bounded(capacity: usize) -> (DeliveryProducer, DeliveryStream) {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        (DeliveryProducer { tx }, DeliveryStream { rx })
    }

    /// Wait for the next delivery. `None` once the stream is closed and
    /// drained.
    ///
    /// Cancel-safe: a delivery is only removed from the channel when this
    /// future completes.
    pub async fn next(&self) -> Option<Delivery> {
        self.rx.recv().await.ok()
    }

    pub fn is_closed(&self) -> bool {
        self.rx.is_closed()
    }
}

impl DeliveryProducer {
    /// Push a delivery, waiting for room. Hands the delivery back if every
    /// consumer is gone so the caller can release it.
    pub async fn send(&self, delivery: Delivery) -> std::result::Result<(), Delivery> {
        self.tx.send(delivery).await.map_err(|e| e.into_inner())
    }

    /// True once every consumer has dropped its stream handle.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Close the stream for every producer and consumer. Deliveries already
    /// buffered are still handed out.
    pub fn close(&self) {
        self.tx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts how often it is dropped without being settled.
    struct DropCounter(Arc<AtomicUsize>);

    #[async_trait]
    impl Acknowledger for DropCounter {
        async fn accept(self: Box<Self>) -> Result<()> {
            std::mem::forget(self);
            Ok(())
        }

        async fn reject(self: Box<Self>, _requeue: bool) -> Result<()> {
            std::mem::forget(self);
            Ok(())
        }
    }

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn buffered_delivery_is_dropped_once_every_handle_is_gone() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let (producer, stream) = DeliveryStream::bounded(1);
        producer
            .send(Delivery::new(
                Message::new("left behind", "text/plain"),
                DropCounter(dropped.clone()),
            ))
            .await
            .unwrap();

        drop(stream);
        assert!(producer.is_closed());
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        drop(producer);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsent_delivery_comes_back_to_the_producer() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let (producer, stream) = DeliveryStream::bounded(1);
        drop(stream);

        let unsent = producer
            .send(Delivery::new(
                Message::new("nobody home", "text/plain"),
                DropCounter(dropped.clone()),
            ))
            .await
            .unwrap_err();
        assert_eq!(unsent.message.body_lossy(), "nobody home");

        drop(unsent);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }
}
