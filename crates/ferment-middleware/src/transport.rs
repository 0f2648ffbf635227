//! The broker adapter seam.
//!
//! The dashboard never speaks MQTT directly.  Outbound traffic goes through a
//! [`Transport`]; inbound traffic arrives on an [`Inbound`] channel that the
//! adapter fills from its own background task.
//!
//! # Overview
//!
//! - [`Transport`] – the trait every adapter implements.
//! - [`MqttTransport`][crate::mqtt::MqttTransport] – talks to a real broker.
//! - [`LoopbackTransport`][crate::loopback::LoopbackTransport] – in-process.

use async_trait::async_trait;
use ferment_types::FermentError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// One message delivered by the broker on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Every broker adapter must implement this trait.
///
/// # Contract
///
/// * `publish` – best-effort send of `payload` on `topic`.  Fails with
///   [`FermentError::Publish`] when the adapter is not connected; success
///   only means the adapter accepted the message, not that it was delivered.
/// * `is_connected` – the adapter's current view of broker connectivity.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), FermentError>;

    fn is_connected(&self) -> bool;
}

/// Receiving half of the message boundary between an adapter's background
/// task and the ingestion pipeline.
///
/// An adapter hands out exactly one `Inbound`.  [`Inbound::on_message`]
/// consumes it, so at most one handler can ever be registered.
pub struct Inbound {
    receiver: mpsc::Receiver<InboundMessage>,
}

impl Inbound {
    /// Create a bounded boundary; returns the adapter-side sender and the
    /// consumer-side [`Inbound`].
    pub fn channel(capacity: usize) -> (mpsc::Sender<InboundMessage>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { receiver: rx })
    }

    /// Wait for the next message.  `None` once the adapter has shut down.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.receiver.recv().await
    }

    /// Register the single handler for inbound messages.
    ///
    /// The handler runs on a spawned Tokio task, once per message, in arrival
    /// order.  The task ends when the adapter drops its sender.
    pub fn on_message<F>(mut self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(InboundMessage) + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(message) = self.receiver.recv().await {
                handler(message);
            }
            debug!("inbound channel closed; message handler exiting");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn recv_yields_messages_in_order() {
        let (tx, mut inbound) = Inbound::channel(4);
        tx.send(InboundMessage::new("a/pub/dht", b"1".to_vec())).await.unwrap();
        tx.send(InboundMessage::new("a/pub/dht", b"2".to_vec())).await.unwrap();
        drop(tx);

        assert_eq!(inbound.recv().await.unwrap().payload, b"1");
        assert_eq!(inbound.recv().await.unwrap().payload, b"2");
        assert!(inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn on_message_handler_sees_every_message_then_exits() {
        let (tx, inbound) = Inbound::channel(4);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let handle = inbound.on_message(move |msg| sink.lock().unwrap().push(msg.payload));

        for payload in [b"x", b"y", b"z"] {
            tx.send(InboundMessage::new("t", payload.to_vec())).await.unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![b"x".to_vec(), b"y".to_vec(), b"z".to_vec()]);
    }
}
