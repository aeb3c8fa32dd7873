//! Redis-backed catalog.
//!
//! `{prefix}:tenantQueues` is a hash from `tenant:queue` to engine queue
//! name and is the canonical record. `{prefix}:tenantQueue:{tenant}` is a set
//! of that tenant's queue names. Both are written in one transaction.

use super::{CatalogEntry, CatalogStore, StoredEntry};
use crate::error::SchedulerResult;
use crate::queue::QueueKey;
use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;
use std::collections::HashMap;
use tessera_core::TenantId;
use tracing::debug;

/// Redis key builder for the catalog.
#[derive(Debug, Clone)]
pub struct CatalogKeys {
    prefix: String,
}

impl CatalogKeys {
    /// Create a new key builder with the given prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Hash of every registered queue.
    pub fn queues(&self) -> String {
        format!("{}:tenantQueues", self.prefix)
    }

    /// Set of one tenant's queue names.
    pub fn tenant(&self, tenant: &str) -> String {
        format!("{}:tenantQueue:{}", self.prefix, tenant)
    }
}

/// Catalog stored in Redis.
pub struct RedisCatalog {
    pool: Pool,
    keys: CatalogKeys,
}

impl RedisCatalog {
    /// Create a new Redis catalog.
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            keys: CatalogKeys::new(key_prefix),
        }
    }

    async fn conn(&self) -> SchedulerResult<Connection> {
        Ok(self.pool.get().await?)
    }
}

#[async_trait]
impl CatalogStore for RedisCatalog {
    async fn add(&self, entry: &CatalogEntry) -> SchedulerResult<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .hset(self.keys.queues(), entry.key.composite(), &entry.engine_name)
            .ignore()
            .sadd(self.keys.tenant(entry.key.tenant.as_str()), entry.key.queue.as_str())
            .ignore()
            .query_async(&mut *conn)
            .await?;

        debug!(key = %entry.key, engine_queue = %entry.engine_name, "Catalog entry written");
        Ok(())
    }

    async fn remove(&self, key: &QueueKey) -> SchedulerResult<()> {
        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .hdel(self.keys.queues(), key.composite())
            .ignore()
            .srem(self.keys.tenant(key.tenant.as_str()), key.queue.as_str())
            .ignore()
            .query_async(&mut *conn)
            .await?;

        debug!(key = %key, "Catalog entry removed");
        Ok(())
    }

    async fn get(&self, key: &QueueKey) -> SchedulerResult<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.hget(self.keys.queues(), key.composite()).await?)
    }

    async fn list(&self) -> SchedulerResult<Vec<StoredEntry>> {
        let mut conn = self.conn().await?;
        let raw: HashMap<String, String> = conn.hgetall(self.keys.queues()).await?;

        let mut entries: Vec<StoredEntry> = raw
            .into_iter()
            .map(|(key, engine_name)| StoredEntry { key, engine_name })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    async fn list_tenant(&self, tenant: &TenantId) -> SchedulerResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let mut queues: Vec<String> = conn.smembers(self.keys.tenant(tenant.as_str())).await?;
        queues.sort();
        Ok(queues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_keys() {
        let keys = CatalogKeys::new("tessera:catalog");
        assert_eq!(keys.queues(), "tessera:catalog:tenantQueues");
        assert_eq!(keys.tenant("t1"), "tessera:catalog:tenantQueue:t1");
    }
}
