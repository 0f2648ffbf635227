//! [`MqttTransport`] – `rumqttc`-backed broker adapter.
//!
//! [`MqttTransport::connect`] drives the MQTT handshake before returning, so
//! an unreachable broker is reported to the caller as
//! [`FermentError::Connection`] instead of surfacing later as silence.  Once
//! connected, a background driver task owns the `rumqttc` event loop:
//!
//! * inbound `PUBLISH` packets are forwarded into the [`Inbound`] channel
//!   (at-most-once: a full channel drops the message with a warning);
//! * every `CONNACK` marks the link up and re-issues all subscriptions, since
//!   the broker may have lost our session;
//! * errors mark the link down and back off before the next poll, which is
//!   also what makes `rumqttc` reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use ferment_types::FermentError;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::{Inbound, InboundMessage, Transport};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Requests buffered between [`AsyncClient`] handles and the event loop.
const REQUEST_CAPACITY: usize = 32;

/// `rumqttc` rejects keep-alive intervals shorter than this.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Broker coordinates and topic namespace for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub keep_alive: Duration,
    /// Prefix for the session client id; a random suffix is appended per
    /// connection.
    pub client_id: String,
    /// Topic prefix shared by the device's inbound and outbound topics.
    pub namespace: String,
    /// Upper bound on the initial handshake.
    pub connect_timeout: Duration,
    /// Inbound messages buffered before new ones are dropped.
    pub inbound_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "broker.hivemq.com".to_string(),
            port: 1883,
            keep_alive: Duration::from_secs(60),
            client_id: "ferment-dashboard".to_string(),
            namespace: "sic/dibimbing/AETHERIUM_AI/FAKHRI_MAULANA_SUBANDI".to_string(),
            connect_timeout: Duration::from_secs(10),
            inbound_capacity: 64,
        }
    }
}

impl MqttConfig {
    /// Topic the device publishes DHT telemetry on.
    pub fn telemetry_topic(&self) -> String {
        format!("{}/pub/dht", self.namespace.trim_end_matches('/'))
    }

    /// Topic the device listens on for mode / stop commands.
    pub fn command_topic(&self) -> String {
        format!("{}/sub/led", self.namespace.trim_end_matches('/'))
    }

    /// Client id for a single session.  Public brokers disconnect an older
    /// session when a second one presents the same id.
    pub fn session_client_id(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", self.client_id, &suffix[..8])
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.session_client_id(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive.max(MIN_KEEP_ALIVE));
        options.set_clean_session(true);
        options
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────

/// State shared between the transport handle and its driver task.
#[derive(Default)]
struct LinkState {
    connected: AtomicBool,
    subscriptions: Mutex<Vec<String>>,
}

impl LinkState {
    fn subscriptions(&self) -> Vec<String> {
        self.lock_subscriptions().clone()
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.lock_subscriptions().iter().any(|t| t == topic)
    }

    fn remember(&self, topic: &str) {
        let mut subscriptions = self.lock_subscriptions();
        if !subscriptions.iter().any(|t| t == topic) {
            subscriptions.push(topic.to_string());
        }
    }

    fn lock_subscriptions(&self) -> MutexGuard<'_, Vec<String>> {
        self.subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Broker adapter over a single MQTT session.
///
/// Construct it once at process start and share it behind an `Arc`; the
/// connection and subscriptions live as long as the value does.
pub struct MqttTransport {
    client: AsyncClient,
    link: Arc<LinkState>,
    driver: JoinHandle<()>,
}

impl MqttTransport {
    /// Connect to the broker described by `config`.
    ///
    /// Returns the transport together with the single [`Inbound`] channel on
    /// which subscribed messages will arrive.
    ///
    /// # Errors
    ///
    /// [`FermentError::Connection`] when the broker cannot be reached (DNS,
    /// TCP, refused `CONNACK`) or does not answer within
    /// `config.connect_timeout`.
    pub async fn connect(config: &MqttConfig) -> Result<(Self, Inbound), FermentError> {
        let options = config.options();
        info!(
            host = %config.host,
            port = config.port,
            client_id = %options.client_id(),
            "connecting to MQTT broker"
        );

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        await_connack(&mut eventloop, config.connect_timeout).await?;
        info!(host = %config.host, port = config.port, "MQTT broker connected");

        let link = Arc::new(LinkState::default());
        link.connected.store(true, Ordering::SeqCst);

        let (tx, inbound) = Inbound::channel(config.inbound_capacity);
        let driver = tokio::spawn(drive(eventloop, client.clone(), Arc::clone(&link), tx));

        Ok((
            Self {
                client,
                link,
                driver,
            },
            inbound,
        ))
    }

    /// Subscribe to `topic`.  Subscribing twice to the same topic is a no-op.
    ///
    /// The subscription is remembered and re-issued after every reconnect.
    pub async fn subscribe(&self, topic: &str) -> Result<(), FermentError> {
        if self.link.is_subscribed(topic) {
            debug!(topic, "already subscribed");
            return Ok(());
        }

        self.client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| FermentError::Connection(format!("subscribe to '{topic}' failed: {e}")))?;
        // Recorded only once the request is queued, so a failed attempt can
        // be retried.
        self.link.remember(topic);
        info!(topic, "subscribed");
        Ok(())
    }

    /// Topics currently subscribed.
    pub fn subscriptions(&self) -> Vec<String> {
        self.link.subscriptions()
    }

    /// Send a clean `DISCONNECT` to the broker.
    pub async fn disconnect(&self) -> Result<(), FermentError> {
        self.link.connected.store(false, Ordering::SeqCst);
        self.client
            .disconnect()
            .await
            .map_err(|e| FermentError::Connection(format!("disconnect failed: {e}")))
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), FermentError> {
        if !self.is_connected() {
            return Err(FermentError::Publish(format!(
                "not connected to broker; message for '{topic}' not sent"
            )));
        }
        self.client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|e| FermentError::Publish(format!("publish to '{topic}' failed: {e}")))
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Event loop
// ────────────────────────────────────────────────────────────────────────────

/// Poll the event loop until the broker acknowledges the connection.
async fn await_connack(eventloop: &mut EventLoop, timeout: Duration) -> Result<(), FermentError> {
    let handshake = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(FermentError::Connection(e.to_string())),
            }
        }
    };

    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| FermentError::Connection(format!("no CONNACK within {timeout:?}")))?
}

/// Background task that owns the `rumqttc` event loop for the session.
async fn drive(
    mut eventloop: EventLoop,
    client: AsyncClient,
    link: Arc<LinkState>,
    inbound: mpsc::Sender<InboundMessage>,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let message = InboundMessage::new(publish.topic, publish.payload.to_vec());
                match inbound.try_send(message) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dropped)) => {
                        warn!(topic = %dropped.topic, "inbound channel full; dropping message");
                    }
                    Err(TrySendError::Closed(_)) => {
                        info!("inbound consumer gone; stopping MQTT driver");
                        break;
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                backoff = INITIAL_BACKOFF;
                if !link.connected.swap(true, Ordering::SeqCst) {
                    info!("MQTT broker reconnected");
                }
                for topic in link.subscriptions() {
                    if let Err(e) = client.try_subscribe(topic.clone(), QoS::AtMostOnce) {
                        warn!(topic = %topic, error = %e, "re-subscribe failed");
                    }
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                link.connected.store(false, Ordering::SeqCst);
                warn!("broker sent DISCONNECT");
            }
            Ok(_) => {}
            Err(e) => {
                if link.connected.swap(false, Ordering::SeqCst) {
                    warn!(error = %e, "lost MQTT broker connection");
                } else {
                    debug!(error = %e, retry_in = ?backoff, "MQTT reconnect attempt failed");
                }
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_are_derived_from_namespace() {
        let config = MqttConfig {
            namespace: "lab/fermenter-1/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.telemetry_topic(), "lab/fermenter-1/pub/dht");
        assert_eq!(config.command_topic(), "lab/fermenter-1/sub/led");
    }

    #[test]
    fn default_topics_match_device_firmware() {
        let config = MqttConfig::default();
        assert_eq!(
            config.telemetry_topic(),
            "sic/dibimbing/AETHERIUM_AI/FAKHRI_MAULANA_SUBANDI/pub/dht"
        );
        assert_eq!(
            config.command_topic(),
            "sic/dibimbing/AETHERIUM_AI/FAKHRI_MAULANA_SUBANDI/sub/led"
        );
    }

    #[test]
    fn session_client_ids_are_unique_and_prefixed() {
        let config = MqttConfig::default();
        let a = config.session_client_id();
        let b = config.session_client_id();
        assert!(a.starts_with("ferment-dashboard-"));
        assert_eq!(a.len(), "ferment-dashboard-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn keep_alive_is_clamped_to_protocol_minimum() {
        let config = MqttConfig {
            keep_alive: Duration::from_secs(1),
            ..Default::default()
        };
        assert_eq!(config.options().keep_alive(), MIN_KEEP_ALIVE);
    }

    #[tokio::test]
    async fn failed_subscribe_is_not_remembered() {
        // Without an event loop the client cannot queue requests.
        let (client, eventloop) = AsyncClient::new(MqttConfig::default().options(), 4);
        drop(eventloop);
        let transport = MqttTransport {
            client,
            link: Arc::new(LinkState::default()),
            driver: tokio::spawn(async {}),
        };

        for _ in 0..2 {
            let err = transport.subscribe("farm/pub/dht").await.unwrap_err();
            assert!(matches!(err, FermentError::Connection(_)));
        }
        assert!(transport.subscriptions().is_empty());
    }

    #[test]
    fn remembered_topics_are_not_duplicated() {
        let link = LinkState::default();
        link.remember("farm/pub/dht");
        link.remember("farm/pub/dht");
        assert!(link.is_subscribed("farm/pub/dht"));
        assert_eq!(link.subscriptions(), ["farm/pub/dht"]);
    }

    #[tokio::test]
    async fn unreachable_broker_is_a_connection_error() {
        let config = MqttConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        match MqttTransport::connect(&config).await {
            Err(FermentError::Connection(_)) => {}
            Err(other) => panic!("expected a connection error, got {other:?}"),
            Ok(_) => panic!("connecting to a closed port must fail"),
        }
    }
}
