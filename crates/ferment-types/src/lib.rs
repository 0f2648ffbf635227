use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Mode reported when the device has not told us which program it runs.
pub const NO_MODE: &str = "NONE";

/// Maximum number of entries kept in the rolling chart history.
pub const HISTORY_CAPACITY: usize = 20;

/// Format a target band the way the device dashboard shows it, e.g. `"24-28 °C"`.
pub fn format_range(target_min: f64, target_max: f64) -> String {
    format!("{target_min}-{target_max} °C")
}

/// One normalized telemetry sample, produced from a single inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub temperature: f64,
    pub humidity: f64,
    pub mode: String,
    pub target_min: f64,
    pub target_max: f64,
    /// Wall-clock receipt time (`HH:MM:SS`).
    pub timestamp: String,
}

impl Reading {
    /// Project this reading into the operator-facing status snapshot.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            temp: self.temperature,
            hum: self.humidity,
            mode: self.mode.clone(),
            range: format_range(self.target_min, self.target_max),
        }
    }

    /// The chart point derived from this reading.
    pub fn history_entry(&self) -> HistoryEntry {
        HistoryEntry {
            time: self.timestamp.clone(),
            temp: self.temperature,
            hum: self.humidity,
        }
    }

    /// `true` when the device reported a non-degenerate target band.
    pub fn has_target_range(&self) -> bool {
        self.target_max > self.target_min
    }
}

/// Current-status projection shown to the operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub temp: f64,
    pub hum: f64,
    pub mode: String,
    pub range: String,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            temp: 0.0,
            hum: 0.0,
            mode: NO_MODE.to_string(),
            range: format_range(0.0, 0.0),
        }
    }
}

/// A single point of the rolling chart history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub time: String,
    pub temp: f64,
    pub hum: f64,
}

/// Outbound instruction for the fermentation device.
///
/// Each variant is sent as its literal upper-case tag on the command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModeCommand {
    /// Bread dough proofing.
    Roti,
    /// Beer fermentation.
    Bir,
    /// Soybean (tempeh) fermentation.
    Tempe,
    /// Milk (yoghurt) fermentation.
    Yoghurt,
    /// Halt the running program.
    Stop,
}

impl ModeCommand {
    /// Every command, mode programs first.
    pub const ALL: [ModeCommand; 5] = [
        ModeCommand::Roti,
        ModeCommand::Bir,
        ModeCommand::Tempe,
        ModeCommand::Yoghurt,
        ModeCommand::Stop,
    ];

    /// The literal wire payload for this command.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModeCommand::Roti => "ROTI",
            ModeCommand::Bir => "BIR",
            ModeCommand::Tempe => "TEMPE",
            ModeCommand::Yoghurt => "YOGHURT",
            ModeCommand::Stop => "STOP",
        }
    }

    /// `true` for the four fermentation programs, `false` for `STOP`.
    pub fn is_program(&self) -> bool {
        !matches!(self, ModeCommand::Stop)
    }
}

impl fmt::Display for ModeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModeCommand {
    type Err = FermentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ModeCommand::ALL
            .into_iter()
            .find(|cmd| cmd.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| FermentError::Parse(format!("unknown mode command '{wanted}'")))
    }
}

/// A safety condition raised against the current status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hazard {
    /// Name of the rule that fired.
    pub rule: String,
    pub message: String,
    /// Temperature that triggered the rule.
    pub temperature: f64,
}

/// Unified event wrapper for the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "ferment-runtime::ingest"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp a new event with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// An inbound message that was dropped during normalization.
    ReadingRejected { reason: String },
    /// A command that the transport accepted for sending.
    CommandDispatched(ModeCommand),
    Hazard(Hazard),
    TransportStatus { connected: bool },
}

/// Error type shared by every crate in the workspace.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FermentError {
    #[error("Broker Connection Error: {0}")]
    Connection(String),

    #[error("Telemetry Parse Error: {0}")]
    Parse(String),

    #[error("Command Publish Error: {0}")]
    Publish(String),

    #[error("Event Channel Error: {0}")]
    Channel(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Serialization Error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_reading() -> Reading {
        Reading {
            temperature: 25.5,
            humidity: 60.0,
            mode: "ROTI".to_string(),
            target_min: 24.0,
            target_max: 28.0,
            timestamp: "08:15:00".to_string(),
        }
    }

    #[test]
    fn format_range_drops_trailing_zero_fraction() {
        assert_eq!(format_range(24.0, 28.0), "24-28 °C");
        assert_eq!(format_range(24.5, 28.0), "24.5-28 °C");
        assert_eq!(format_range(0.0, 0.0), "0-0 °C");
    }

    #[test]
    fn default_status_is_the_waiting_state() {
        let status = StatusSnapshot::default();
        assert_eq!(status.temp, 0.0);
        assert_eq!(status.hum, 0.0);
        assert_eq!(status.mode, "NONE");
        assert_eq!(status.range, "0-0 °C");
    }

    #[test]
    fn reading_projects_into_status_and_history() {
        let reading = sample_reading();
        let status = reading.status();
        assert_eq!(status.temp, 25.5);
        assert_eq!(status.hum, 60.0);
        assert_eq!(status.mode, "ROTI");
        assert_eq!(status.range, "24-28 °C");

        let entry = reading.history_entry();
        assert_eq!(entry.time, "08:15:00");
        assert_eq!(entry.temp, 25.5);
        assert_eq!(entry.hum, 60.0);
    }

    #[test]
    fn target_range_requires_max_above_min() {
        let mut reading = sample_reading();
        assert!(reading.has_target_range());
        reading.target_min = 0.0;
        reading.target_max = 0.0;
        assert!(!reading.has_target_range());
    }

    #[test]
    fn mode_command_wire_literals() {
        let literals: Vec<&str> = ModeCommand::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(literals, ["ROTI", "BIR", "TEMPE", "YOGHURT", "STOP"]);
        assert_eq!(ModeCommand::Stop.to_string(), "STOP");
        assert!(!ModeCommand::Stop.is_program());
        assert!(ModeCommand::Yoghurt.is_program());
    }

    #[test]
    fn mode_command_parses_case_insensitively() {
        assert_eq!("tempe".parse::<ModeCommand>(), Ok(ModeCommand::Tempe));
        assert_eq!(" STOP ".parse::<ModeCommand>(), Ok(ModeCommand::Stop));
        let err = "kimchi".parse::<ModeCommand>().unwrap_err();
        assert!(matches!(err, FermentError::Parse(_)));
    }

    #[test]
    fn mode_command_serializes_as_tag() {
        let json = serde_json::to_string(&ModeCommand::Yoghurt).unwrap();
        assert_eq!(json, "\"YOGHURT\"");
    }

    #[test]
    fn event_carries_rejection_reason() {
        let event = Event::new(
            "ferment-runtime::ingest",
            EventPayload::ReadingRejected {
                reason: "payload is not JSON".to_string(),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, event.id);
        assert_eq!(back.source, "ferment-runtime::ingest");
        assert!(matches!(back.payload, EventPayload::ReadingRejected { reason } if reason.contains("JSON")));
    }

    #[test]
    fn ferment_error_display() {
        let err = FermentError::Publish("not connected".to_string());
        assert!(err.to_string().contains("Command Publish Error"));

        let err = FermentError::Connection("dns lookup failed".to_string());
        assert!(err.to_string().contains("dns lookup failed"));
    }
}
