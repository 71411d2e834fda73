//! Telemetry: logging infrastructure for ShopSuite Core.
//!
//! Structured logging is the only exporter-free telemetry layer this crate
//! ships; metric counters are emitted through the `metrics` facade and wired
//! to an exporter by the embedding application.

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig, SpanEventConfig};

use serde::Deserialize;

/// Unified telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Service name for identification in logs
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Environment (development, staging, production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            environment: default_environment(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_service_name() -> String {
    "shopsuite-core".to_string()
}

fn default_environment() -> String {
    std::env::var("SHOPSUITE_ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
}

/// Initialize the telemetry stack.
///
/// Should be called once at application startup.
///
/// # Errors
///
/// Returns an error if the tracing subscriber fails to initialize.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    init_logging(&config.logging, &config.environment)?;

    ::tracing::info!(
        service = %config.service_name,
        environment = %config.environment,
        "Telemetry initialized"
    );

    Ok(())
}
