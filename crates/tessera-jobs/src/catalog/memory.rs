//! In-process catalog.

use super::{CatalogEntry, CatalogStore, StoredEntry};
use crate::error::SchedulerResult;
use crate::queue::QueueKey;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tessera_core::TenantId;

#[derive(Debug, Default)]
struct CatalogState {
    entries: BTreeMap<String, String>,
    tenants: HashMap<String, BTreeSet<String>>,
}

/// Catalog kept in process memory.
///
/// Clones share storage, so a clone handed to a second bootstrap sees what
/// the first instance wrote.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl MemoryCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a raw entry without validating the key.
    pub fn insert_raw(&self, key: impl Into<String>, engine_name: impl Into<String>) {
        self.state.lock().entries.insert(key.into(), engine_name.into());
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if an entry exists for the key.
    pub fn contains(&self, key: &QueueKey) -> bool {
        self.state.lock().entries.contains_key(&key.composite())
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn add(&self, entry: &CatalogEntry) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        state
            .entries
            .insert(entry.key.composite(), entry.engine_name.clone());
        state
            .tenants
            .entry(entry.key.tenant.to_string())
            .or_default()
            .insert(entry.key.queue.to_string());
        Ok(())
    }

    async fn remove(&self, key: &QueueKey) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        state.entries.remove(&key.composite());
        if let Some(queues) = state.tenants.get_mut(key.tenant.as_str()) {
            queues.remove(key.queue.as_str());
        }
        Ok(())
    }

    async fn get(&self, key: &QueueKey) -> SchedulerResult<Option<String>> {
        Ok(self.state.lock().entries.get(&key.composite()).cloned())
    }

    async fn list(&self) -> SchedulerResult<Vec<StoredEntry>> {
        Ok(self
            .state
            .lock()
            .entries
            .iter()
            .map(|(key, engine_name)| StoredEntry {
                key: key.clone(),
                engine_name: engine_name.clone(),
            })
            .collect())
    }

    async fn list_tenant(&self, tenant: &TenantId) -> SchedulerResult<Vec<String>> {
        Ok(self
            .state
            .lock()
            .tenants
            .get(tenant.as_str())
            .map(|queues| queues.iter().cloned().collect())
            .unwrap_or_default())
    }
}
