//! Telemetry and logging setup
//!
//! Structured logging via `tracing`, configured once at process startup.

use crate::error::Result;

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name included in log output
    pub service_name: String,
    /// Log level filter (overridden by RUST_LOG when set)
    pub log_level: String,
    /// Emit ANSI color codes
    pub ansi_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "selkie".to_string(),
            log_level: "info".to_string(),
            ansi_enabled: true,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Create from environment variables (`RUST_LOG`)
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        Self {
            log_level,
            ..Default::default()
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Safe to call more than once; later calls are no-ops (useful in tests
/// where several cases race to initialize).
pub fn init_telemetry(config: &TelemetryConfig) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let _ = fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi_enabled)
        .with_target(true)
        .try_init();

    tracing::debug!(service = %config.service_name, "telemetry initialized");
    Ok(())
}
