//! Durable catalog of registered queues.
//!
//! The catalog maps `tenant:queue` to the engine queue name the queue was
//! created with. It is only read back by bootstrap.

mod memory;
pub mod redis;

pub use memory::MemoryCatalog;
pub use self::redis::RedisCatalog;

use crate::error::SchedulerResult;
use crate::queue::QueueKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tessera_core::TenantId;

/// A catalog record for a registered queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Composite key.
    pub key: QueueKey,
    /// Engine queue name, stored verbatim.
    pub engine_name: String,
}

impl CatalogEntry {
    /// Creates an entry.
    pub fn new(key: QueueKey, engine_name: impl Into<String>) -> Self {
        Self {
            key,
            engine_name: engine_name.into(),
        }
    }
}

/// A catalog record exactly as stored, before key validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// Raw composite key.
    pub key: String,
    /// Engine queue name.
    pub engine_name: String,
}

impl StoredEntry {
    /// Validates the raw key.
    pub fn parse(&self) -> SchedulerResult<CatalogEntry> {
        Ok(CatalogEntry::new(
            QueueKey::from_composite(&self.key)?,
            self.engine_name.clone(),
        ))
    }
}

/// Durable storage for catalog entries.
///
/// `add` must be durable before it returns.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Writes an entry, replacing any entry with the same key.
    async fn add(&self, entry: &CatalogEntry) -> SchedulerResult<()>;

    /// Removes an entry. Removing an absent entry succeeds.
    async fn remove(&self, key: &QueueKey) -> SchedulerResult<()>;

    /// Engine name stored for a key.
    async fn get(&self, key: &QueueKey) -> SchedulerResult<Option<String>>;

    /// Every stored entry, ordered by key.
    async fn list(&self) -> SchedulerResult<Vec<StoredEntry>>;

    /// Queue names stored for one tenant, sorted.
    async fn list_tenant(&self, tenant: &TenantId) -> SchedulerResult<Vec<String>>;
}
