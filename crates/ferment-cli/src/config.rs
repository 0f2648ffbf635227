//! Configuration Vault – reads/writes `~/.ferment/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ferment_kernel::{HazardMonitor, OutOfTargetRangeRule, UnderTemperatureRule};
use ferment_middleware::MqttConfig;

// ────────────────────────────────────────────────────────────────────────────
// Config
// ────────────────────────────────────────────────────────────────────────────

/// Persisted operator configuration stored in `~/.ferment/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// MQTT broker host name.
    #[serde(default = "default_broker_host")]
    pub broker_host: String,

    #[serde(default = "default_broker_port")]
    pub broker_port: u16,

    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Prefix of the MQTT client id; each session appends a random suffix.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topic prefix of the device (`<namespace>/pub/dht`, `<namespace>/sub/led`).
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// HTTP/WebSocket port of the cockpit server.
    #[serde(default = "default_cockpit_port")]
    pub cockpit_port: u16,

    /// Period between dashboard frames.
    #[serde(default = "default_refresh_millis")]
    pub refresh_millis: u64,

    /// Device silence after which the data is shown as stale.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Over-temperature alarm threshold in °C.
    #[serde(default = "default_max_temperature")]
    pub max_temperature: f64,

    /// Optional under-temperature alarm threshold in °C.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_temperature: Option<f64>,

    /// Allowed drift outside the device's target band before alarming.
    /// Unset disables the target-band check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_tolerance: Option<f64>,
}

fn default_broker_host() -> String {
    "broker.hivemq.com".to_string()
}
fn default_broker_port() -> u16 {
    1883
}
fn default_keep_alive_secs() -> u64 {
    60
}
fn default_client_id() -> String {
    "ferment-dashboard".to_string()
}
fn default_namespace() -> String {
    "sic/dibimbing/AETHERIUM_AI/FAKHRI_MAULANA_SUBANDI".to_string()
}
fn default_cockpit_port() -> u16 {
    8080
}
fn default_refresh_millis() -> u64 {
    1000
}
fn default_stale_after_secs() -> u64 {
    30
}
fn default_max_temperature() -> f64 {
    ferment_kernel::hazard::DEFAULT_MAX_TEMPERATURE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            broker_host: default_broker_host(),
            broker_port: default_broker_port(),
            keep_alive_secs: default_keep_alive_secs(),
            client_id: default_client_id(),
            namespace: default_namespace(),
            cockpit_port: default_cockpit_port(),
            refresh_millis: default_refresh_millis(),
            stale_after_secs: default_stale_after_secs(),
            max_temperature: default_max_temperature(),
            min_temperature: None,
            target_tolerance: None,
        }
    }
}

impl Config {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), String> {
        if self.broker_host.trim().is_empty() {
            return Err("broker_host must not be empty".to_string());
        }
        if self.namespace.trim().trim_matches('/').trim().is_empty() {
            return Err("namespace must not be empty".to_string());
        }
        if self.refresh_millis == 0 {
            return Err("refresh_millis must be greater than zero".to_string());
        }
        if !self.max_temperature.is_finite() {
            return Err("max_temperature must be a finite number".to_string());
        }
        if let Some(min) = self.min_temperature
            && !(min < self.max_temperature)
        {
            return Err(format!(
                "min_temperature ({min}) must be below max_temperature ({})",
                self.max_temperature
            ));
        }
        if let Some(tolerance) = self.target_tolerance
            && !(tolerance >= 0.0)
        {
            return Err("target_tolerance must be zero or positive".to_string());
        }
        Ok(())
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            host: self.broker_host.trim().to_string(),
            port: self.broker_port,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            client_id: self.client_id.clone(),
            namespace: self.namespace.trim().to_string(),
            ..MqttConfig::default()
        }
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_millis(self.refresh_millis)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    /// The hazard rules selected by this configuration.
    pub fn hazard_monitor(&self) -> HazardMonitor {
        let mut monitor = HazardMonitor::with_max_temperature(self.max_temperature);
        if let Some(min_celsius) = self.min_temperature {
            monitor.add_rule(Box::new(UnderTemperatureRule { min_celsius }));
        }
        if let Some(tolerance) = self.target_tolerance {
            monitor.add_rule(Box::new(OutOfTargetRangeRule { tolerance }));
        }
        monitor
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Disk I/O
// ────────────────────────────────────────────────────────────────────────────

/// Return the path to `~/.ferment/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".ferment").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| format!("Failed to parse config: {}", e))
}

// ────────────────────────────────────────────────────────────────────────────
// Environment overrides
// ────────────────────────────────────────────────────────────────────────────

/// Apply `FERMENT_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `FERMENT_BROKER_HOST` | `broker_host` |
/// | `FERMENT_BROKER_PORT` | `broker_port` |
/// | `FERMENT_CLIENT_ID` | `client_id` |
/// | `FERMENT_NAMESPACE` | `namespace` |
/// | `FERMENT_COCKPIT_PORT` | `cockpit_port` |
/// | `FERMENT_REFRESH_MILLIS` | `refresh_millis` |
/// | `FERMENT_MAX_TEMPERATURE` | `max_temperature` |
///
/// Values that fail to parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("FERMENT_BROKER_HOST") {
        cfg.broker_host = v;
    }
    if let Some(port) = lookup("FERMENT_BROKER_PORT").and_then(|v| v.trim().parse().ok()) {
        cfg.broker_port = port;
    }
    if let Some(v) = lookup("FERMENT_CLIENT_ID") {
        cfg.client_id = v;
    }
    if let Some(v) = lookup("FERMENT_NAMESPACE") {
        cfg.namespace = v;
    }
    if let Some(port) = lookup("FERMENT_COCKPIT_PORT").and_then(|v| v.trim().parse().ok()) {
        cfg.cockpit_port = port;
    }
    if let Some(millis) = lookup("FERMENT_REFRESH_MILLIS").and_then(|v| v.trim().parse().ok()) {
        cfg.refresh_millis = millis;
    }
    if let Some(max) = lookup("FERMENT_MAX_TEMPERATURE")
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
    {
        cfg.max_temperature = max;
    }
}

/// Save the config to disk, creating `~/.ferment/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}
