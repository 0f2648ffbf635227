//! Logging and trace-export initialisation.
//!
//! Call [`init_tracing`] once at process start-up, before the Tokio runtime
//! is built, and hold the returned guard until exit.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `FERMENT_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector base URL; enables span export. |
//!
//! # Example
//!
//! ```rust,no_run
//! let _guard = ferment_runtime::telemetry::init_tracing("fermentd");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the console log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Everything [`init_tracing`] reads from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySettings {
    pub filter: String,
    pub format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

impl TelemetrySettings {
    pub fn from_env() -> Self {
        Self::from_vars(
            std::env::var("RUST_LOG").ok(),
            std::env::var("FERMENT_LOG_FORMAT").ok(),
            std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
        )
    }

    fn from_vars(
        rust_log: Option<String>,
        log_format: Option<String>,
        otlp_endpoint: Option<String>,
    ) -> Self {
        let format = match log_format.as_deref().map(str::trim) {
            Some(f) if f.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };
        Self {
            filter: rust_log
                .filter(|f| !f.trim().is_empty())
                .unwrap_or_else(|| "info".to_string()),
            format,
            otlp_endpoint: otlp_endpoint.filter(|e| !e.trim().is_empty()),
        }
    }
}

/// Install the global `tracing` subscriber.
///
/// Console output is always on; OTLP span export is added when
/// `OTEL_EXPORTER_OTLP_ENDPOINT` is set and the exporter can be built.
/// Calling this twice leaves the first subscriber in place.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let settings = TelemetrySettings::from_env();
    let env_filter = EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let provider = settings
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| build_provider(service_name, endpoint));
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("ferment")));

    let (json_layer, compact_layer) = match settings.format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Compact => (None, Some(tracing_subscriber::fmt::layer().compact())),
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("[fermentd] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

/// Shuts the OTel [`SdkTracerProvider`] down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[fermentd] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

fn build_provider(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[fermentd] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple (synchronous) export: no Tokio runtime exists yet at init time.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_environment_is_empty() {
        let settings = TelemetrySettings::from_vars(None, None, None);
        assert_eq!(settings.filter, "info");
        assert_eq!(settings.format, LogFormat::Compact);
        assert_eq!(settings.otlp_endpoint, None);
    }

    #[test]
    fn json_format_is_case_insensitive() {
        let settings = TelemetrySettings::from_vars(None, Some(" JSON ".to_string()), None);
        assert_eq!(settings.format, LogFormat::Json);
    }

    #[test]
    fn blank_values_are_ignored() {
        let settings = TelemetrySettings::from_vars(
            Some("  ".to_string()),
            Some("pretty".to_string()),
            Some(String::new()),
        );
        assert_eq!(settings.filter, "info");
        assert_eq!(settings.format, LogFormat::Compact);
        assert_eq!(settings.otlp_endpoint, None);
    }

    #[test]
    fn explicit_filter_and_endpoint_are_kept() {
        let settings = TelemetrySettings::from_vars(
            Some("ferment_runtime=debug".to_string()),
            None,
            Some("http://localhost:4318".to_string()),
        );
        assert_eq!(settings.filter, "ferment_runtime=debug");
        assert_eq!(settings.otlp_endpoint.as_deref(), Some("http://localhost:4318"));
    }

    #[test]
    fn guard_without_provider_drops_cleanly() {
        drop(TracerProviderGuard(None));
    }
}
