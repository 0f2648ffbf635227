//! `ferment-middleware` – The Wire
//!
//! Moves bytes between the broker and the rest of the dashboard without
//! deciding what they mean beyond turning payloads into [`Reading`]s.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`transport`] – the [`Transport`] trait every broker adapter implements,
//!   plus the single-consumer [`Inbound`] message boundary.
//! - [`mqtt`] – [`MqttTransport`], the `rumqttc`-backed adapter.
//! - [`loopback`] – [`LoopbackTransport`], an in-process adapter for tests
//!   and offline wiring.
//! - [`normalizer`] – lenient JSON → [`Reading`] decoding.
//!
//! [`Reading`]: ferment_types::Reading

pub mod bus;
pub mod loopback;
pub mod mqtt;
pub mod normalizer;
pub mod transport;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use loopback::LoopbackTransport;
pub use mqtt::{MqttConfig, MqttTransport};
pub use transport::{Inbound, InboundMessage, Transport};
