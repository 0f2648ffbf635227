//! `ferment-kernel` – State & Safety
//!
//! Owns the only shared-mutable state in the dashboard and the rules that
//! judge it.  Nothing in here performs I/O.
//!
//! # Modules
//!
//! - [`state_store`] – [`StateStore`][state_store::StateStore]: the latest
//!   status snapshot plus the bounded chart history, updated and read as one
//!   atomic unit.  [`DashboardView`][state_store::DashboardView] is the
//!   consistent point-in-time copy handed to readers, and
//!   [`Freshness`][state_store::Freshness] tells "never received" apart from
//!   "received a zero" and from "gone quiet".
//! - [`hazard`] – [`HazardMonitor`][hazard::HazardMonitor]: a rule engine
//!   that evaluates the current status against registered
//!   [`HazardRule`][hazard::HazardRule]s (over-temperature, etc.).
//! - [`mode`] – [`ModeTracker`][mode::ModeTracker]: the dashboard's advisory
//!   view of the device program, fed by dispatched commands and confirmed by
//!   telemetry.

pub mod hazard;
pub mod mode;
pub mod state_store;

pub use hazard::{
    HazardMonitor, HazardRule, OutOfTargetRangeRule, OverTemperatureRule, UnderTemperatureRule,
};
pub use mode::{ModeState, ModeTracker};
pub use state_store::{DashboardView, Freshness, StateStore};
