//! Telemetry normalizer: raw DHT payload → [`Reading`].
//!
//! The device is trusted but the network is not, so decoding is lenient once
//! the payload is a JSON object:
//!
//! | Field | Accepted | Fallback |
//! |---|---|---|
//! | `temperature`, `humidity`, `target_min`, `target_max` | JSON number or numeric string | `0.0` |
//! | `mode` | JSON string | `"NONE"` |
//!
//! Numbers outside the `f64` range (`1e400`) count as invalid and fall back
//! too.  Unknown fields are ignored.  Only a payload that is not UTF-8 JSON, or not
//! an object, is rejected with [`FermentError::Parse`].
//!
//! The reading is stamped with the local wall-clock time of receipt; the
//! device has no clock worth trusting.

use chrono::{DateTime, Local};
use ferment_types::{FermentError, NO_MODE, Reading};
use serde_json::{Map, Value};

/// Format of [`Reading::timestamp`].
pub const TIMESTAMP_FORMAT: &str = "%H:%M:%S";

/// Decode `payload`, stamping it with the current local time.
pub fn parse(payload: &[u8]) -> Result<Reading, FermentError> {
    parse_at(payload, Local::now())
}

/// Decode `payload`, stamping it with `received_at`.
pub fn parse_at(payload: &[u8], received_at: DateTime<Local>) -> Result<Reading, FermentError> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| FermentError::Parse(format!("payload is not UTF-8: {e}")))?;
    let value: Value = serde_json::from_str(text)
        .map_err(|e| FermentError::Parse(format!("payload is not JSON: {e}")))?;
    let fields = match value {
        Value::Object(fields) => fields,
        other => {
            return Err(FermentError::Parse(format!(
                "expected a JSON object, got {}",
                kind_of(&other)
            )));
        }
    };

    Ok(Reading {
        temperature: number(&fields, "temperature"),
        humidity: number(&fields, "humidity"),
        mode: mode(&fields),
        target_min: number(&fields, "target_min"),
        target_max: number(&fields, "target_max"),
        timestamp: received_at.format(TIMESTAMP_FORMAT).to_string(),
    })
}

fn number(fields: &Map<String, Value>, key: &str) -> f64 {
    let parsed = match fields.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn mode(fields: &Map<String, Value>) -> String {
    match fields.get("mode") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => NO_MODE.to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
