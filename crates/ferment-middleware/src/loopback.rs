//! [`LoopbackTransport`] – in-process broker stand-in.
//!
//! Records every publish and lets the caller inject inbound messages as if a
//! device had sent them.  Connectivity can be toggled to exercise the
//! not-connected publish path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use ferment_types::FermentError;
use tokio::sync::mpsc;

use crate::transport::{Inbound, InboundMessage, Transport};

pub struct LoopbackTransport {
    connected: AtomicBool,
    published: Mutex<Vec<InboundMessage>>,
    inbound: mpsc::Sender<InboundMessage>,
}

impl LoopbackTransport {
    /// Create a connected loopback together with its [`Inbound`] channel.
    pub fn new(capacity: usize) -> (Self, Inbound) {
        let (tx, inbound) = Inbound::channel(capacity);
        (
            Self {
                connected: AtomicBool::new(true),
                published: Mutex::new(Vec::new()),
                inbound: tx,
            },
            inbound,
        )
    }

    /// Deliver `payload` on `topic` to the inbound side.
    pub async fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> Result<(), FermentError> {
        self.inbound
            .send(InboundMessage::new(topic, payload))
            .await
            .map_err(|_| FermentError::Channel("loopback inbound receiver dropped".to_string()))
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Everything published so far, oldest first.
    pub fn published(&self) -> Vec<InboundMessage> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), FermentError> {
        if !self.is_connected() {
            return Err(FermentError::Publish(format!(
                "loopback disconnected; message for '{topic}' not sent"
            )));
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(InboundMessage::new(topic, payload.to_vec()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
