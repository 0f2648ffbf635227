//! `ferment-cockpit` – browser access to the dashboard
//!
//! Boots a small HTTP + WebSocket server (default port `8080`) on top of the
//! runtime's [`Dashboard`] presentation port:
//!
//! 1. **Plain HTTP** – any request is answered with the current [`Frame`] as
//!    JSON, which makes `curl localhost:8080` a quick health check.
//!
//! 2. **WebSocket** – every connected client receives
//!    `{"type":"frame", ...}` once per refresh period.  When the server was
//!    given the [`EventBus`] it also forwards `{"type":"alert", ...}` for
//!    hazards, broker-link changes and dropped telemetry, and
//!    `{"type":"command", ...}` for every dispatched command.
//!
//! 3. **Upstream commands** – clients send
//!    `{"topic":"/mode","msg":{"command":"ROTI"}}` or `{"topic":"/stop"}`
//!    and get back `{"type":"ack","command":"ROTI"}` or
//!    `{"type":"error","message":"..."}`.
//!
//! Rendering is left entirely to the client.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ferment_cockpit::CockpitServer;
//! use ferment_runtime::Dashboard;
//!
//! async fn serve(dashboard: Arc<Dashboard>) -> Result<(), ferment_types::FermentError> {
//!     CockpitServer::new(dashboard).with_port(8080).run().await
//! }
//! ```
//!
//! [`Dashboard`]: ferment_runtime::Dashboard
//! [`Frame`]: ferment_runtime::Frame
//! [`EventBus`]: ferment_middleware::EventBus

pub mod server;

pub use server::{BoundCockpit, CockpitServer, DEFAULT_PORT, DEFAULT_REFRESH};
