//! Queue identity and handles.

use crate::error::{SchedulerError, SchedulerResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tessera_core::validation::rules::KEY_SEPARATOR;
use tessera_core::{QueueName, TenantId};

/// Composite `(tenant, queue)` key, unique across the registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueKey {
    /// Owning tenant.
    pub tenant: TenantId,
    /// Queue name within the tenant.
    pub queue: QueueName,
}

impl QueueKey {
    /// Creates a key from validated parts.
    pub fn new(tenant: TenantId, queue: QueueName) -> Self {
        Self { tenant, queue }
    }

    /// Validates raw strings into a key.
    pub fn parse(tenant: &str, queue: &str) -> SchedulerResult<Self> {
        Ok(Self {
            tenant: TenantId::parse(tenant)?,
            queue: QueueName::parse(queue)?,
        })
    }

    /// Parses a catalog key of the form `tenant:queue`.
    pub fn from_composite(composite: &str) -> SchedulerResult<Self> {
        let (tenant, queue) = composite.split_once(KEY_SEPARATOR).ok_or_else(|| {
            SchedulerError::InvalidArgument(format!(
                "Catalog key '{}' has no '{}' separator",
                composite, KEY_SEPARATOR
            ))
        })?;
        Self::parse(tenant, queue)
    }

    /// Catalog key, `tenant:queue`.
    pub fn composite(&self) -> String {
        format!("{}{}{}", self.tenant, KEY_SEPARATOR, self.queue)
    }

    /// Engine queue name for a freshly created queue, `tenant-queue`.
    ///
    /// Only used at creation time; afterwards the stored name is authoritative.
    pub fn engine_name(&self) -> String {
        format!("{}-{}", self.tenant, self.queue)
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.tenant, KEY_SEPARATOR, self.queue)
    }
}

/// Dispatch state of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    /// Waiting jobs are dispatched.
    #[default]
    Active,
    /// Nothing new is dispatched; an already-active job runs to completion.
    Paused,
}

impl QueueState {
    /// State matching an engine paused flag.
    pub fn from_paused(paused: bool) -> Self {
        if paused {
            Self::Paused
        } else {
            Self::Active
        }
    }
}

/// Durable per-queue metadata kept by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueMeta {
    /// When the engine queue was first created.
    pub created_at: DateTime<Utc>,
    /// Whether the engine queue is paused.
    pub paused: bool,
}

/// A registered queue as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHandle {
    /// Composite key.
    pub key: QueueKey,
    /// Engine queue name, stored verbatim.
    pub engine_name: String,
    /// Dispatch state.
    pub state: QueueState,
    /// Creation time reported by the engine.
    pub created_at: DateTime<Utc>,
}

impl QueueHandle {
    /// Builds a handle from engine metadata.
    pub fn from_meta(key: QueueKey, engine_name: impl Into<String>, meta: QueueMeta) -> Self {
        Self {
            key,
            engine_name: engine_name.into(),
            state: QueueState::from_paused(meta.paused),
            created_at: meta.created_at,
        }
    }

    /// Returns true if the queue is paused.
    pub fn is_paused(&self) -> bool {
        self.state == QueueState::Paused
    }
}
