//! Startup recovery: rebuilds the registry and worker bindings from the
//! catalog.

use crate::catalog::CatalogStore;
use crate::clock::Clock;
use crate::config::JobsConfig;
use crate::di::SchedulerService;
use crate::engine::QueueEngine;
use crate::error::{SchedulerError, SchedulerResult};
use crate::metrics::{BootstrapMetrics, QueueMetrics};
use crate::queue::QueueKey;
use crate::worker::JobHandler;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// A catalog entry that could not be recovered.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapFailure {
    /// Raw catalog key.
    pub key: String,
    /// Engine queue name stored for it.
    pub engine_name: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Outcome of a bootstrap run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapReport {
    /// Queues now registered and bound.
    pub recovered: Vec<QueueKey>,
    /// Entries that were skipped.
    pub failures: Vec<BootstrapFailure>,
}

impl BootstrapReport {
    /// Returns true if every entry was recovered.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Builds a service from the catalog.
///
/// Each entry is restored with its stored engine queue name. A failing entry
/// is recorded and skipped; only a failure to read the catalog aborts.
pub async fn bootstrap(
    engine: Arc<dyn QueueEngine>,
    catalog: Arc<dyn CatalogStore>,
    handler: Arc<dyn JobHandler>,
    config: &JobsConfig,
    clock: Arc<dyn Clock>,
) -> SchedulerResult<(SchedulerService, BootstrapReport)> {
    let entries = catalog.list().await.map_err(|e| {
        SchedulerError::EngineUnavailable(format!("Failed to read catalog: {}", e))
    })?;
    info!(entries = entries.len(), "Recovering queues from catalog");

    let service = SchedulerService::with_clock(engine, catalog, handler, config, clock);
    let mut report = BootstrapReport::default();

    for stored in entries {
        let restored = match stored.parse() {
            Ok(entry) => service.queues().restore(&entry.key, &entry.engine_name).await,
            Err(e) => Err(e),
        };

        match restored {
            Ok(handle) => report.recovered.push(handle.key),
            Err(e) => {
                warn!(key = %stored.key, engine_queue = %stored.engine_name, error = %e, "Skipping catalog entry");
                report.failures.push(BootstrapFailure {
                    key: stored.key,
                    engine_name: stored.engine_name,
                    reason: e.to_string(),
                });
            }
        }
    }

    BootstrapMetrics::record(report.recovered.len(), report.failures.len());
    QueueMetrics::update_registered(report.recovered.len());
    info!(
        recovered = report.recovered.len(),
        failed = report.failures.len(),
        "Bootstrap complete"
    );
    Ok((service, report))
}
