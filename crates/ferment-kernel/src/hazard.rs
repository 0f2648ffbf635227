//! [`HazardMonitor`] – safety rule engine for the fermentation chamber.
//!
//! Every registered [`HazardRule`] is evaluated against the latest accepted
//! [`Reading`].  Unlike an intent verifier, evaluation does not stop at the
//! first violation: the operator sees every hazard that currently applies.
//!
//! While no reading has ever arrived nothing is evaluated, so placeholder
//! zeroes can never trip a low-temperature rule at start-up.
//!
//! Built-in rules:
//! - [`OverTemperatureRule`] – chamber hotter than a fixed limit (40 °C by
//!   default).
//! - [`UnderTemperatureRule`] – chamber colder than a fixed limit.
//! - [`OutOfTargetRangeRule`] – chamber outside the band the device reports
//!   for its active program.

use ferment_types::{Hazard, Reading};

use crate::state_store::DashboardView;

/// Default over-temperature limit in °C.
pub const DEFAULT_MAX_TEMPERATURE: f64 = 40.0;

/// A single condition the chamber must satisfy.
pub trait HazardRule: Send + Sync {
    /// Human-readable name used in hazard reports.
    fn name(&self) -> &str;

    /// Return a [`Hazard`] when `reading` violates the rule.
    fn check(&self, reading: &Reading) -> Option<Hazard>;
}

/// Rule engine evaluating a [`DashboardView`] against all registered rules.
///
/// # Example
///
/// ```
/// use ferment_kernel::hazard::{HazardMonitor, OverTemperatureRule};
/// use ferment_kernel::state_store::StateStore;
/// use ferment_types::Reading;
///
/// let mut monitor = HazardMonitor::new();
/// monitor.add_rule(Box::new(OverTemperatureRule { max_celsius: 40.0 }));
///
/// let store = StateStore::new();
/// assert!(monitor.evaluate(&store.read_snapshot()).is_empty());
///
/// store.apply_reading(&Reading {
///     temperature: 45.0,
///     humidity: 50.0,
///     mode: "NONE".to_string(),
///     target_min: 0.0,
///     target_max: 0.0,
///     timestamp: "13:00:00".to_string(),
/// });
/// assert_eq!(monitor.evaluate(&store.read_snapshot()).len(), 1);
/// ```
#[derive(Default)]
pub struct HazardMonitor {
    rules: Vec<Box<dyn HazardRule>>,
}

impl HazardMonitor {
    /// Create an empty monitor with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Monitor with the standard over-temperature rule at `max_celsius`.
    pub fn with_max_temperature(max_celsius: f64) -> Self {
        let mut monitor = Self::new();
        monitor.add_rule(Box::new(OverTemperatureRule { max_celsius }));
        monitor
    }

    /// Register a new rule.  Rules are reported in insertion order.
    pub fn add_rule(&mut self, rule: Box<dyn HazardRule>) {
        self.rules.push(rule);
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// All hazards raised by the latest reading in `view`.
    pub fn evaluate(&self, view: &DashboardView) -> Vec<Hazard> {
        match &view.latest {
            Some(reading) => self.check(reading),
            None => Vec::new(),
        }
    }

    /// All hazards raised by `reading`.
    pub fn check(&self, reading: &Reading) -> Vec<Hazard> {
        self.rules.iter().filter_map(|rule| rule.check(reading)).collect()
    }
}

impl std::fmt::Debug for HazardMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HazardMonitor")
            .field("rules", &self.rule_names())
            .finish()
    }
}

/// Raises a hazard when the temperature is strictly above `max_celsius`.
pub struct OverTemperatureRule {
    pub max_celsius: f64,
}

impl Default for OverTemperatureRule {
    fn default() -> Self {
        Self {
            max_celsius: DEFAULT_MAX_TEMPERATURE,
        }
    }
}

impl HazardRule for OverTemperatureRule {
    fn name(&self) -> &str {
        "over_temperature"
    }

    fn check(&self, reading: &Reading) -> Option<Hazard> {
        (reading.temperature > self.max_celsius).then(|| Hazard {
            rule: self.name().to_string(),
            message: format!(
                "temperature {} °C exceeds limit {} °C",
                reading.temperature, self.max_celsius
            ),
            temperature: reading.temperature,
        })
    }
}

/// Raises a hazard when the temperature is strictly below `min_celsius`.
pub struct UnderTemperatureRule {
    pub min_celsius: f64,
}

impl HazardRule for UnderTemperatureRule {
    fn name(&self) -> &str {
        "under_temperature"
    }

    fn check(&self, reading: &Reading) -> Option<Hazard> {
        (reading.temperature < self.min_celsius).then(|| Hazard {
            rule: self.name().to_string(),
            message: format!(
                "temperature {} °C below limit {} °C",
                reading.temperature, self.min_celsius
            ),
            temperature: reading.temperature,
        })
    }
}

/// Raises a hazard when a program is running and the temperature sits
/// outside the target band the device reported, widened by `tolerance`.
///
/// Readings without a band (`target_max <= target_min`) are never flagged.
pub struct OutOfTargetRangeRule {
    pub tolerance: f64,
}

impl HazardRule for OutOfTargetRangeRule {
    fn name(&self) -> &str {
        "out_of_target_range"
    }

    fn check(&self, reading: &Reading) -> Option<Hazard> {
        if !reading.has_target_range() {
            return None;
        }
        let low = reading.target_min - self.tolerance;
        let high = reading.target_max + self.tolerance;
        if reading.temperature >= low && reading.temperature <= high {
            return None;
        }
        Some(Hazard {
            rule: self.name().to_string(),
            message: format!(
                "temperature {} °C outside target {} for {}",
                reading.temperature,
                reading.status().range,
                reading.mode
            ),
            temperature: reading.temperature,
        })
    }
}
