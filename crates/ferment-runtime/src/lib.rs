//! `ferment-runtime` – The Pipeline
//!
//! Wires the wire to the state: inbound telemetry flows through the
//! normalizer into the kernel's store, operator commands flow out through the
//! transport, and the presentation side reads frames on its own cadence.
//!
//! # Modules
//!
//! - [`ingest`] – [`Ingestor`][ingest::Ingestor] and
//!   [`spawn_ingestion`][ingest::spawn_ingestion]: the background path
//!   transport → normalizer → store → bus.  Nothing on this path ever
//!   propagates an error to the presentation side; failures are logged and
//!   the message is dropped.
//! - [`dispatcher`] – [`CommandDispatcher`][dispatcher::CommandDispatcher]:
//!   maps a [`ModeCommand`][ferment_types::ModeCommand] to its wire literal
//!   and publishes it once.  Failures are returned to the caller.
//! - [`dashboard`] – [`Dashboard`][dashboard::Dashboard]: the presentation
//!   port.  Renderers register with `on_tick`; user actions go through
//!   `on_command`.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: global
//!   `tracing` subscriber with optional OTLP export.

pub mod dashboard;
pub mod dispatcher;
pub mod ingest;
pub mod telemetry;

pub use dashboard::{Dashboard, Frame};
pub use dispatcher::CommandDispatcher;
pub use ingest::{IngestStats, Ingestor, spawn_ingestion};
pub use telemetry::{TracerProviderGuard, init_tracing};
