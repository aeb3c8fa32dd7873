//! Backend selection and service assembly.

use anyhow::Context;
use std::sync::Arc;
use tessera_config::{AppConfig, Backend};
use tessera_jobs::{
    bootstrap, create_pool, BootstrapReport, CatalogStore, JobHandler, JobsConfig, MemoryCatalog, MemoryEngine,
    QueueEngine, RedisCatalog, RedisEngine, SchedulerService, SystemClock,
};
use tracing::info;

/// Engine and catalog for the configured backend.
pub async fn create_backend(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn QueueEngine>, Arc<dyn CatalogStore>)> {
    match config.backend {
        Backend::Redis => {
            let pool = create_pool(&config.redis)
                .await
                .context("Failed to connect to Redis")?;
            let engine = RedisEngine::new(pool.clone(), config.redis.engine_key_prefix.clone());
            let catalog = RedisCatalog::new(pool, config.redis.catalog_key_prefix.clone());
            Ok((Arc::new(engine), Arc::new(catalog)))
        }
        Backend::Memory => {
            info!("Using in-memory backend; queues will not survive a restart");
            Ok((Arc::new(MemoryEngine::default()), Arc::new(MemoryCatalog::new())))
        }
    }
}

/// Builds the scheduler service and recovers every catalogued queue.
pub async fn start(
    config: &AppConfig,
    handler: Arc<dyn JobHandler>,
) -> anyhow::Result<(SchedulerService, BootstrapReport)> {
    let (engine, catalog) = create_backend(config).await?;
    let jobs_config = JobsConfig::from(config);

    let started = bootstrap(engine, catalog, handler, &jobs_config, Arc::new(SystemClock))
        .await
        .context("Failed to recover queues from catalog")?;
    Ok(started)
}
