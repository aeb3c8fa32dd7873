//! Tracing initialisation.
//!
//! Sets up a `tracing-subscriber` registry with an `EnvFilter` and either the
//! human-readable or the JSON formatter.

use crate::{TesseraError, TesseraResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Service name attached to the startup log line.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON lines instead of the pretty formatter.
    #[serde(default)]
    pub json: bool,

    /// Include the event target in each line.
    #[serde(default = "default_with_target")]
    pub with_target: bool,
}

fn default_service_name() -> String {
    "tessera-scheduler".to_string()
}

fn default_filter() -> String {
    "info,tessera=debug".to_string()
}

fn default_with_target() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            filter: default_filter(),
            json: false,
            with_target: default_with_target(),
        }
    }
}

impl TelemetryConfig {
    /// Builds the filter, preferring `RUST_LOG` when present.
    pub fn env_filter(&self) -> TesseraResult<EnvFilter> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.filter).map_err(|e| {
                TesseraError::configuration(format!("Invalid log filter '{}': {}", self.filter, e))
            }),
        }
    }
}

/// Initialise the global tracing subscriber.
///
/// Fails if the filter directive is invalid or a subscriber is already set.
pub fn init_tracing(config: &TelemetryConfig) -> TesseraResult<()> {
    let filter = config.env_filter()?;

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.with_target),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(config.with_target))
            .try_init()
    };

    result.map_err(|e| TesseraError::internal(format!("Failed to install tracing subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        json = config.json,
        "Tracing initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "tessera-scheduler");
        assert_eq!(config.filter, "info,tessera=debug");
        assert!(!config.json);
        assert!(config.with_target);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: TelemetryConfig = serde_json::from_str(r#"{"json": true}"#).unwrap();
        assert!(config.json);
        assert_eq!(config.filter, "info,tessera=debug");
    }
}
