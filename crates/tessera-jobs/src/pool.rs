//! Redis connection pool shared by the Redis engine and the Redis catalog.

use crate::error::{SchedulerError, SchedulerResult};
use deadpool_redis::{Config, Pool, PoolConfig, Runtime, Timeouts};
use tessera_config::RedisConfig;
use tracing::info;

/// Create a Redis connection pool and check that the server answers.
pub async fn create_pool(config: &RedisConfig) -> SchedulerResult<Pool> {
    info!(url = %redact(&config.url), pool_size = config.pool_size, "Creating Redis connection pool");

    let mut cfg = Config::from_url(&config.url);
    cfg.pool = Some(PoolConfig {
        max_size: config.pool_size,
        timeouts: Timeouts {
            wait: Some(config.connect_timeout()),
            create: Some(config.connect_timeout()),
            recycle: Some(config.connect_timeout()),
        },
        ..PoolConfig::default()
    });

    let pool = cfg
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|e| SchedulerError::EngineUnavailable(format!("Failed to create pool: {}", e)))?;

    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Strips credentials from a Redis URL for logging.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
