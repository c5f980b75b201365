use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log level/filter '{value}': unable to build EnvFilter")]
    EnvFilter { value: String, source: ParseError },
    #[error("telemetry error: {0}")]
    Subscriber(Box<dyn std::error::Error + Send + Sync>),
}

/// Installs the Prometheus recorder and the global tracing subscriber.
/// `RUST_LOG` wins over the configured level.
///
/// The recorder goes in first so gauges set while services are being built
/// are not lost to the no-op recorder.
pub fn init(log_level: &str) -> Result<(), TelemetryError> {
    metrics_handle();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level).map_err(|source| TelemetryError::EnvFilter {
            value: log_level.to_string(),
            source,
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(TelemetryError::Subscriber)
}

/// Returns the process-wide Prometheus handle, installing the recorder on first use.
///
/// If another recorder already owns the global slot (as happens when several
/// test binaries share a process), a detached recorder is built instead so
/// `/metrics` still renders.
pub fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("Failed to install prometheus recorder due to: {}", e);
                PrometheusBuilder::new().build_recorder().handle()
            }
        })
        .clone()
}
