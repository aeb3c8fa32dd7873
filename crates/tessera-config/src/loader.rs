//! Configuration loader with layered sources.

use crate::validation::{format_validation_errors, ConfigValidator};
use crate::AppConfig;
use config::{Config, ConfigError, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_core::{TesseraError, TesseraResult};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Environment variable selecting the `{environment}.toml` overlay.
pub const ENVIRONMENT_VAR: &str = "TESSERA_ENVIRONMENT";

/// Prefix for override variables, e.g. `TESSERA__REDIS__URL`.
pub const ENV_PREFIX: &str = "TESSERA";

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `{config_dir}/default.toml` - Default values
    /// 2. `{config_dir}/{environment}.toml` - Environment-specific overrides
    /// 3. `{config_dir}/local.toml` - Local overrides
    /// 4. Environment variables with the `TESSERA__` prefix
    pub fn new(config_dir: impl Into<PathBuf>) -> TesseraResult<Self> {
        let config_dir = config_dir.into();

        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }
        let environment =
            std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string());

        let config = Self::load_config(&config_dir, &environment)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> TesseraResult<Self> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    ///
    /// The previous configuration is kept if the new one fails to load.
    pub async fn reload(&self) -> TesseraResult<()> {
        let environment =
            std::env::var(ENVIRONMENT_VAR).unwrap_or_else(|_| "development".to_string());
        let new_config = Self::load_config(&self.config_dir, &environment)?;
        *self.config.write().await = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Loads and validates configuration for one environment.
    pub fn load_config(config_dir: &Path, environment: &str) -> TesseraResult<AppConfig> {
        info!(
            config_dir = %config_dir.display(),
            environment,
            "Loading configuration"
        );

        let mut builder = Config::builder();

        for name in ["default", environment, "local"] {
            let path = config_dir.join(format!("{}.toml", name));
            if path.exists() {
                debug!("Loading config from: {}", path.display());
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let app_config: AppConfig = builder
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(config_error_to_tessera_error)?;

        if let Err(errors) = ConfigValidator::validate(&app_config) {
            return Err(TesseraError::configuration(format_validation_errors(&errors)));
        }

        if app_config.app.environment == "production" && app_config.logging.filter.contains("debug") {
            warn!("Debug logging is enabled in production");
        }

        Ok(app_config)
    }
}

fn config_error_to_tessera_error(err: ConfigError) -> TesseraError {
    TesseraError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Backend, PastRunAtPolicy};
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) {
        fs::write(dir.path().join(name), contents).unwrap();
    }

    #[test]
    fn test_empty_dir_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigLoader::load_config(dir.path(), "development").unwrap();
        assert_eq!(config.backend, Backend::Redis);
        assert_eq!(config.redis.pool_size, 10);
    }

    #[test]
    fn test_environment_file_overrides_default() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "default.toml",
            "backend = \"redis\"\n[redis]\npool_size = 4\n[worker]\npoll_interval_ms = 50\n",
        );
        write(&dir, "staging.toml", "backend = \"memory\"\n[redis]\npool_size = 8\n");

        let config = ConfigLoader::load_config(dir.path(), "staging").unwrap();
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.redis.pool_size, 8);
        assert_eq!(config.worker.poll_interval_ms, 50);
    }

    #[test]
    fn test_local_overrides_environment() {
        let dir = TempDir::new().unwrap();
        write(&dir, "development.toml", "[schedule]\npast_run_at = \"reject\"\n");
        write(&dir, "local.toml", "[schedule]\npast_run_at = \"clamp\"\n");

        let config = ConfigLoader::load_config(dir.path(), "development").unwrap();
        assert_eq!(config.schedule.past_run_at, PastRunAtPolicy::Clamp);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();
        write(&dir, "default.toml", "[redis]\npool_size = 0\n");

        let err = ConfigLoader::load_config(dir.path(), "development").unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert!(err.to_string().contains("pool size"));
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        let dir = TempDir::new().unwrap();
        write(&dir, "default.toml", "backend = \"cassandra\"\n");

        let err = ConfigLoader::load_config(dir.path(), "development").unwrap_err();
        assert!(matches!(err, TesseraError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_loader_get_and_reload() {
        let dir = TempDir::new().unwrap();
        write(&dir, "default.toml", "[worker]\njob_timeout_secs = 10\n");

        let loader = ConfigLoader::new(dir.path()).unwrap();
        assert_eq!(loader.get().await.worker.job_timeout_secs, 10);

        write(&dir, "default.toml", "[worker]\njob_timeout_secs = 20\n");
        loader.reload().await.unwrap();
        assert_eq!(loader.get().await.worker.job_timeout_secs, 20);
    }
}
