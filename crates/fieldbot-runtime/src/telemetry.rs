//! Log output and optional OpenTelemetry export for a rover process.
//!
//! Call [`init_tracing`] once at start-up and keep the returned guard alive.
//! Spans follow the shape of a session: one `session` span per run (carrying
//! the run id), a `tick` span per loop iteration inside it, and a `plan`
//! span whenever the obstacle planner takes over. With an OTLP endpoint
//! configured those spans are exported under a resource that names the rover.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `FIELDBOT_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//! | `FIELDBOT_ROVER_ID` | Rover name attached to exported spans (default `"fieldbot"`). |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP/HTTP collector base URL. Export is off when unset. |
//!
//! # Example
//!
//! ```rust,no_run
//! use fieldbot_runtime::telemetry::{TelemetryConfig, init_tracing};
//!
//! let _guard = init_tracing(&TelemetryConfig::from_env("sim"));
//! ```

use opentelemetry::KeyValue;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "fieldbot";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Where log lines go and what exported spans are tagged with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub filter: String,
    pub format: LogFormat,
    /// Name of this rover, exported as `fieldbot.rover_id`.
    pub rover_id: String,
    /// Hardware profile the binary was built for, e.g. `"sim"` or `"raspberry-pi"`.
    pub hardware: String,
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    /// Read the settings from the process environment.
    pub fn from_env(hardware: &str) -> Self {
        Self::from_lookup(hardware, |key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(hardware: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            filter: non_empty("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            format: match lookup("FIELDBOT_LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Compact,
            },
            rover_id: non_empty("FIELDBOT_ROVER_ID").unwrap_or_else(|| SERVICE_NAME.to_string()),
            hardware: hardware.to_string(),
            otlp_endpoint: non_empty("OTEL_EXPORTER_OTLP_ENDPOINT"),
        }
    }

    /// Resource attributes attached to every exported span.
    pub fn resource_attributes(&self) -> Vec<KeyValue> {
        vec![
            KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            KeyValue::new("fieldbot.rover_id", self.rover_id.clone()),
            KeyValue::new("fieldbot.hardware", self.hardware.clone()),
        ]
    }
}

/// Install the global `tracing` subscriber described by `config`.
///
/// An invalid filter falls back to `info`. When the OTLP exporter cannot be
/// built the error goes to stderr and logging continues without export.
///
/// The returned [`TracerProviderGuard`] **must** be held for the lifetime of
/// the process; dropping it flushes pending spans.
pub fn init_tracing(config: &TelemetryConfig) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    let provider = build_provider(config);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer(SERVICE_NAME)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    TracerProviderGuard(provider)
}

/// Shuts the OTel [`SdkTracerProvider`] down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[fieldbot] span export shutdown failed: {e}");
        }
    }
}

fn build_provider(config: &TelemetryConfig) -> Option<SdkTracerProvider> {
    let endpoint = config.otlp_endpoint.clone()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[fieldbot] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_attributes(config.resource_attributes())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // The session runtime is built after this, so no batch exporter.
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> TelemetryConfig {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        TelemetryConfig::from_lookup("sim", |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]);
        assert_eq!(config.filter, "info");
        assert_eq!(config.format, LogFormat::Compact);
        assert_eq!(config.rover_id, "fieldbot");
        assert_eq!(config.otlp_endpoint, None);
        assert!(build_provider(&config).is_none());
    }

    #[test]
    fn environment_overrides_are_picked_up() {
        let config = config_from(&[
            ("RUST_LOG", "fieldbot_runtime=debug"),
            ("FIELDBOT_LOG_FORMAT", "json"),
            ("FIELDBOT_ROVER_ID", "greenhouse-2"),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", "  "),
        ]);
        assert_eq!(config.filter, "fieldbot_runtime=debug");
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.rover_id, "greenhouse-2");
        assert_eq!(config.otlp_endpoint, None, "blank endpoint disables export");
    }

    #[test]
    fn exported_spans_name_the_rover() {
        let config = config_from(&[("FIELDBOT_ROVER_ID", "row-7")]);
        let attrs = config.resource_attributes();
        let value = |key: &str| {
            attrs
                .iter()
                .find(|kv| kv.key.as_str() == key)
                .map(|kv| kv.value.to_string())
        };
        assert_eq!(value("fieldbot.rover_id").as_deref(), Some("row-7"));
        assert_eq!(value("fieldbot.hardware").as_deref(), Some("sim"));
        assert_eq!(value("service.version").as_deref(), Some(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn empty_guard_is_not_exporting() {
        let guard = TracerProviderGuard(None);
        assert!(!guard.is_exporting());
    }
}
