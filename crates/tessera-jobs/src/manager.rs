//! Queue manager: keeps the registry, the catalog, the engine and the worker
//! bindings in step.
//!
//! Ordering rules:
//! - register: reserve the key and its engine queue name, open engine queue, write catalog, commit, bind.
//! - delete: mark removing, unbind, purge, close, remove catalog entry, drop.
//! - rename: reserve new, mark old removing, pause old, open new, add new
//!   catalog entry, remove old catalog entry, commit, rebind.
//!
//! A registry entry is only dropped once every engine and catalog effect of
//! the removal is confirmed.

use crate::catalog::{CatalogEntry, CatalogStore};
use crate::engine::QueueEngine;
use crate::error::{SchedulerError, SchedulerResult};
use crate::job::JobPartition;
use crate::metrics::QueueMetrics;
use crate::queue::{QueueHandle, QueueKey, QueueMeta, QueueState};
use crate::registry::QueueRegistry;
use crate::worker::WorkerManager;
use std::sync::Arc;
use tessera_core::{QueueName, TenantId};
use tracing::{error, info, warn};

/// Message of an engine-side error without its kind prefix.
fn detail(err: &SchedulerError) -> String {
    match err {
        SchedulerError::EngineUnavailable(message) | SchedulerError::EngineInconsistent(message) => {
            message.clone()
        }
        other => other.to_string(),
    }
}

/// Registry and catalog manager.
pub struct QueueManager {
    engine: Arc<dyn QueueEngine>,
    catalog: Arc<dyn CatalogStore>,
    registry: Arc<QueueRegistry>,
    workers: Arc<WorkerManager>,
}

impl QueueManager {
    /// Creates a manager over shared components.
    pub fn new(
        engine: Arc<dyn QueueEngine>,
        catalog: Arc<dyn CatalogStore>,
        registry: Arc<QueueRegistry>,
        workers: Arc<WorkerManager>,
    ) -> Self {
        Self {
            engine,
            catalog,
            registry,
            workers,
        }
    }

    /// Registers a new queue.
    pub async fn register(&self, key: &QueueKey) -> SchedulerResult<QueueHandle> {
        let engine_name = key.engine_name();
        let reservation = self.registry.reserve(key, &engine_name)?;

        let meta = match self.engine.open_queue(&engine_name).await {
            Ok(meta) => meta,
            Err(e) => {
                QueueMetrics::operation_failed("register", e.error_code());
                return Err(e);
            }
        };

        if let Err(e) = self.catalog.add(&CatalogEntry::new(key.clone(), engine_name.clone())).await {
            if let Err(close_err) = self.engine.close_queue(&engine_name).await {
                warn!(key = %key, error = %close_err, "Failed to close engine queue after catalog failure");
            }
            QueueMetrics::operation_failed("register", "ENGINE_UNAVAILABLE");
            return Err(SchedulerError::EngineUnavailable(format!(
                "Catalog write for {} failed: {}",
                key,
                detail(&e)
            )));
        }

        let handle = QueueHandle::from_meta(key.clone(), engine_name, meta);
        reservation.commit(handle.clone());
        self.workers.bind(&handle.key, &handle.engine_name);

        QueueMetrics::queue_registered(key.tenant.as_str());
        QueueMetrics::update_registered(self.registry.len());
        info!(key = %key, engine_queue = %handle.engine_name, state = ?handle.state, "Queue registered");
        Ok(handle)
    }

    /// Re-creates a queue from a catalog entry without writing the catalog.
    pub async fn restore(&self, key: &QueueKey, engine_name: &str) -> SchedulerResult<QueueHandle> {
        let reservation = self.registry.reserve(key, engine_name)?;
        let meta = self.engine.open_queue(engine_name).await?;

        let handle = QueueHandle::from_meta(key.clone(), engine_name, meta);
        reservation.commit(handle.clone());
        self.workers.bind(&handle.key, &handle.engine_name);

        info!(key = %key, engine_queue = engine_name, state = ?handle.state, "Queue restored");
        Ok(handle)
    }

    /// Looks up a queue.
    pub fn lookup(&self, key: &QueueKey) -> SchedulerResult<QueueHandle> {
        self.registry.get(key)
    }

    /// A tenant's queues in name order.
    pub fn list(&self, tenant: &TenantId) -> SchedulerResult<Vec<QueueHandle>> {
        self.registry.list(tenant)
    }

    /// Stops dispatching new jobs. A paused queue is left as is.
    pub async fn pause(&self, key: &QueueKey) -> SchedulerResult<QueueHandle> {
        let handle = self.registry.get(key)?;
        if handle.is_paused() {
            return Ok(handle);
        }
        self.engine.pause(&handle.engine_name).await?;
        let handle = self.registry.set_state(key, QueueState::Paused)?;
        info!(key = %key, "Queue paused");
        Ok(handle)
    }

    /// Resumes dispatching. An active queue is left as is.
    pub async fn resume(&self, key: &QueueKey) -> SchedulerResult<QueueHandle> {
        let handle = self.registry.get(key)?;
        if !handle.is_paused() {
            return Ok(handle);
        }
        self.engine.resume(&handle.engine_name).await?;
        let handle = self.registry.set_state(key, QueueState::Active)?;
        info!(key = %key, "Queue resumed");
        Ok(handle)
    }

    /// Deletes a queue and every job in it.
    pub async fn delete(&self, key: &QueueKey) -> SchedulerResult<()> {
        let handle = self.registry.begin_remove(key)?;
        self.workers.unbind(key).await;

        if let Err(e) = self.engine.purge(&handle.engine_name, &JobPartition::ALL).await {
            self.registry.restore(key);
            self.workers.bind(key, &handle.engine_name);
            QueueMetrics::operation_failed("delete", "ENGINE_INCONSISTENT");
            error!(key = %key, error = %e, "Purge failed, queue kept");
            return Err(SchedulerError::EngineInconsistent(format!(
                "Purge of {} failed, queue kept: {}",
                key,
                detail(&e)
            )));
        }

        if let Err(e) = self.engine.close_queue(&handle.engine_name).await {
            warn!(key = %key, error = %e, "Failed to close engine queue");
        }

        if let Err(e) = self.catalog.remove(key).await {
            self.registry.restore(key);
            QueueMetrics::operation_failed("delete", "ENGINE_INCONSISTENT");
            error!(key = %key, error = %e, "Catalog removal failed after purge, queue kept without worker");
            return Err(SchedulerError::EngineInconsistent(format!(
                "Jobs of {} were purged but the catalog entry could not be removed: {}",
                key,
                detail(&e)
            )));
        }

        self.registry.finish_remove(key);
        QueueMetrics::queue_deleted(key.tenant.as_str());
        QueueMetrics::update_registered(self.registry.len());
        info!(key = %key, engine_queue = %handle.engine_name, "Queue deleted");
        Ok(())
    }

    /// Renames a queue. Jobs stay behind in the old, paused engine queue.
    pub async fn rename(&self, old_key: &QueueKey, new_name: QueueName) -> SchedulerResult<QueueHandle> {
        self.registry.get(old_key)?;
        let new_key = QueueKey::new(old_key.tenant.clone(), new_name);
        let new_engine = new_key.engine_name();
        let reservation = self.registry.reserve(&new_key, &new_engine)?;
        let old = self.registry.begin_remove(old_key)?;

        if let Err(e) = self.engine.pause(&old.engine_name).await {
            self.registry.restore(old_key);
            return Err(e);
        }

        let meta = match self.open_active(&new_engine).await {
            Ok(meta) => meta,
            Err(e) => {
                self.undo_rename(&old).await;
                return Err(e);
            }
        };

        let entry = CatalogEntry::new(new_key.clone(), new_engine.clone());
        if let Err(e) = self.catalog.add(&entry).await {
            self.close_quietly(&new_engine).await;
            self.undo_rename(&old).await;
            return Err(SchedulerError::EngineUnavailable(format!(
                "Catalog write for {} failed: {}",
                new_key,
                detail(&e)
            )));
        }

        if let Err(e) = self.catalog.remove(old_key).await {
            let cleanup = self.catalog.remove(&new_key).await;
            self.close_quietly(&new_engine).await;
            self.undo_rename(&old).await;
            QueueMetrics::operation_failed("rename", "ENGINE_INCONSISTENT");
            return Err(match cleanup {
                Ok(()) => SchedulerError::EngineUnavailable(format!(
                    "Catalog removal of {} failed: {}",
                    old_key,
                    detail(&e)
                )),
                Err(cleanup_err) => {
                    error!(old = %old_key, new = %new_key, error = %cleanup_err, "Catalog holds both names after failed rename");
                    SchedulerError::EngineInconsistent(format!(
                        "Catalog holds both {} and {}: {}",
                        old_key,
                        new_key,
                        detail(&e)
                    ))
                }
            });
        }

        let handle = QueueHandle::from_meta(new_key, new_engine, meta);
        reservation.commit(handle.clone());
        self.registry.finish_remove(old_key);

        self.workers.unbind(old_key).await;
        self.close_quietly(&old.engine_name).await;
        self.workers.bind(&handle.key, &handle.engine_name);

        info!(
            old = %old_key,
            new = %handle.key,
            engine_queue = %handle.engine_name,
            "Queue renamed; jobs were not migrated"
        );
        Ok(handle)
    }

    /// Starts a binding for a registered queue whose worker is gone.
    /// Returns false if a binding is already running.
    pub fn rebind(&self, key: &QueueKey) -> SchedulerResult<bool> {
        let handle = self.registry.get(key)?;
        let bound = self.workers.bind(key, &handle.engine_name);
        if bound {
            info!(key = %key, "Worker rebound");
        }
        Ok(bound)
    }

    /// Stops every binding, closes every engine handle and empties the registry.
    pub async fn shutdown(&self) {
        self.workers.unbind_all().await;
        for handle in self.registry.drain() {
            self.close_quietly(&handle.engine_name).await;
        }
        QueueMetrics::update_registered(0);
        info!("Queue manager shut down");
    }

    /// Opens an engine queue and makes sure it dispatches.
    async fn open_active(&self, engine_name: &str) -> SchedulerResult<QueueMeta> {
        let meta = self.engine.open_queue(engine_name).await?;
        if meta.paused {
            if let Err(e) = self.engine.resume(engine_name).await {
                self.close_quietly(engine_name).await;
                return Err(e);
            }
        }
        Ok(QueueMeta { paused: false, ..meta })
    }

    async fn undo_rename(&self, old: &QueueHandle) {
        if !old.is_paused() {
            if let Err(e) = self.engine.resume(&old.engine_name).await {
                error!(key = %old.key, error = %e, "Failed to resume queue after aborted rename");
            }
        }
        self.registry.restore(&old.key);
    }

    async fn close_quietly(&self, engine_name: &str) {
        if let Err(e) = self.engine.close_queue(engine_name).await {
            warn!(engine_queue = engine_name, error = %e, "Failed to close engine queue");
        }
    }
}
