//! Configuration validation.
//!
//! Collects every problem in one pass so startup fails with the full list
//! rather than one error at a time.

use crate::{AppConfig, Backend};
use std::fmt;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    /// Redis URL is empty or has the wrong scheme.
    InvalidUrl { url_type: String, message: String },
    /// Connection pool cannot be empty.
    EmptyPool,
    /// Pool size exceeds maximum allowed.
    PoolSizeTooLarge { value: usize, maximum: usize },
    /// Interval or timeout must be positive.
    NonPositiveDuration { name: String },
    /// Key prefix must not be blank.
    BlankKeyPrefix { name: String },
    /// Engine and catalog would share the same key space.
    PrefixCollision { prefix: String },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl { url_type, message } => {
                write!(f, "Invalid {} URL: {}", url_type, message)
            }
            Self::EmptyPool => write!(f, "Redis pool size must be at least 1"),
            Self::PoolSizeTooLarge { value, maximum } => {
                write!(f, "Pool size {} exceeds maximum allowed ({})", value, maximum)
            }
            Self::NonPositiveDuration { name } => {
                write!(f, "'{}' must be positive", name)
            }
            Self::BlankKeyPrefix { name } => write!(f, "'{}' must not be blank", name),
            Self::PrefixCollision { prefix } => {
                write!(f, "Engine and catalog key prefixes are both '{}'", prefix)
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Maximum connection pool size.
    const MAX_POOL_SIZE: usize = 1000;

    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        if config.backend == Backend::Redis {
            Self::validate_redis(&config.redis, &mut errors);
        }
        Self::validate_worker(&config.worker, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_redis(config: &crate::RedisConfig, errors: &mut Vec<ConfigValidationError>) {
        if config.url.trim().is_empty() {
            errors.push(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: "URL cannot be empty".to_string(),
            });
        } else if !config.url.starts_with("redis://")
            && !config.url.starts_with("rediss://")
            && !config.url.starts_with("unix://")
        {
            errors.push(ConfigValidationError::InvalidUrl {
                url_type: "redis".to_string(),
                message: "URL must start with redis://, rediss:// or unix://".to_string(),
            });
        }

        if config.pool_size == 0 {
            errors.push(ConfigValidationError::EmptyPool);
        } else if config.pool_size > Self::MAX_POOL_SIZE {
            errors.push(ConfigValidationError::PoolSizeTooLarge {
                value: config.pool_size,
                maximum: Self::MAX_POOL_SIZE,
            });
        }

        if config.connect_timeout_secs == 0 {
            errors.push(ConfigValidationError::NonPositiveDuration {
                name: "redis.connect_timeout_secs".to_string(),
            });
        }

        for (name, prefix) in [
            ("redis.engine_key_prefix", &config.engine_key_prefix),
            ("redis.catalog_key_prefix", &config.catalog_key_prefix),
        ] {
            if prefix.trim().is_empty() {
                errors.push(ConfigValidationError::BlankKeyPrefix {
                    name: name.to_string(),
                });
            }
        }
        if config.engine_key_prefix == config.catalog_key_prefix {
            errors.push(ConfigValidationError::PrefixCollision {
                prefix: config.engine_key_prefix.clone(),
            });
        }
    }

    fn validate_worker(config: &crate::WorkerConfig, errors: &mut Vec<ConfigValidationError>) {
        for (name, value) in [
            ("worker.poll_interval_ms", config.poll_interval_ms),
            ("worker.job_timeout_secs", config.job_timeout_secs),
            ("worker.shutdown_timeout_secs", config.shutdown_timeout_secs),
        ] {
            if value == 0 {
                errors.push(ConfigValidationError::NonPositiveDuration {
                    name: name.to_string(),
                });
            }
        }
    }
}

/// Formats validation errors for display.
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    let mut output = String::from("Configuration validation failed:\n");
    for (i, error) in errors.iter().enumerate() {
        output.push_str(&format!("  {}. {}\n", i + 1, error));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_passes() {
        assert!(ConfigValidator::validate(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_empty_redis_url() {
        let mut config = AppConfig::default();
        config.redis.url = String::new();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ConfigValidationError::InvalidUrl { url_type, .. } if url_type == "redis"
        )));
    }

    #[test]
    fn test_wrong_redis_scheme() {
        let mut config = AppConfig::default();
        config.redis.url = "http://localhost:6379".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_zero_pool_size() {
        let mut config = AppConfig::default();
        config.redis.pool_size = 0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.contains(&ConfigValidationError::EmptyPool));
    }

    #[test]
    fn test_zero_poll_interval() {
        let mut config = AppConfig::default();
        config.worker.poll_interval_ms = 0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(
            e,
            ConfigValidationError::NonPositiveDuration { name } if name == "worker.poll_interval_ms"
        )));
    }

    #[test]
    fn test_memory_backend_skips_redis_checks() {
        let mut config = AppConfig::default();
        config.backend = Backend::Memory;
        config.redis.url = String::new();
        config.redis.pool_size = 0;
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_prefix_collision() {
        let mut config = AppConfig::default();
        config.redis.catalog_key_prefix = config.redis.engine_key_prefix.clone();

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, ConfigValidationError::PrefixCollision { .. })));
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = AppConfig::default();
        config.redis.url = String::new();
        config.redis.pool_size = 0;
        config.worker.job_timeout_secs = 0;

        let errors = ConfigValidator::validate(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_format_validation_errors() {
        let output = format_validation_errors(&[
            ConfigValidationError::EmptyPool,
            ConfigValidationError::NonPositiveDuration {
                name: "worker.poll_interval_ms".to_string(),
            },
        ]);
        assert!(output.contains("1. Redis pool size"));
        assert!(output.contains("2. 'worker.poll_interval_ms'"));
    }
}
