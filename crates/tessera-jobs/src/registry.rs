//! In-memory tenant → queue registry.
//!
//! Every slot transition happens under one synchronous lock that is never
//! held across an `.await`. Async work on a key runs while the key's slot is
//! reserved (`Pending`) or marked `Removing`, which is what serialises
//! operations racing on the same key.

use crate::error::{NotFoundKind, SchedulerError, SchedulerResult};
use crate::queue::{QueueHandle, QueueKey, QueueState};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tessera_core::{QueueName, TenantId};

#[derive(Debug)]
enum Slot {
    /// Reserved, holding the engine queue name it will be bound to.
    Pending(String),
    Live(QueueHandle),
    Removing(QueueHandle),
}

impl Slot {
    fn visible(&self) -> Option<&QueueHandle> {
        match self {
            Self::Pending(_) => None,
            Self::Live(handle) | Self::Removing(handle) => Some(handle),
        }
    }

    fn engine_name(&self) -> &str {
        match self {
            Self::Pending(engine_name) => engine_name,
            Self::Live(handle) | Self::Removing(handle) => &handle.engine_name,
        }
    }
}

#[derive(Debug, Default)]
struct TenantSlots {
    /// Set once the tenant's first queue is committed; tenants are never removed after that.
    established: bool,
    queues: BTreeMap<QueueName, Slot>,
}

/// Registry of the queues this process serves.
///
/// Empty until bootstrap or registration fills it.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    tenants: Mutex<HashMap<TenantId, TenantSlots>>,
}

impl QueueRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claims a key together with its engine queue name.
    ///
    /// Fails `AlreadyExists` if the key is live, being removed or reserved by
    /// a concurrent call, or if any slot of any tenant already holds
    /// `engine_name`.
    pub fn reserve(&self, key: &QueueKey, engine_name: &str) -> SchedulerResult<Reservation<'_>> {
        let mut tenants = self.tenants.lock();
        if let Some(holder) = tenants.iter().find_map(|(tenant, slots)| {
            slots
                .queues
                .iter()
                .find(|(_, slot)| slot.engine_name() == engine_name)
                .map(|(queue, _)| QueueKey::new(tenant.clone(), queue.clone()))
        }) {
            if holder == *key {
                return Err(SchedulerError::AlreadyExists(key.to_string()));
            }
            return Err(SchedulerError::AlreadyExists(format!(
                "{} (engine queue '{}' is held by {})",
                key, engine_name, holder
            )));
        }

        let slots = tenants.entry(key.tenant.clone()).or_default();
        if slots.queues.contains_key(&key.queue) {
            return Err(SchedulerError::AlreadyExists(key.to_string()));
        }
        slots.queues.insert(key.queue.clone(), Slot::Pending(engine_name.to_string()));

        Ok(Reservation {
            registry: self,
            key: key.clone(),
            committed: false,
        })
    }

    /// Looks up a queue.
    pub fn get(&self, key: &QueueKey) -> SchedulerResult<QueueHandle> {
        let tenants = self.tenants.lock();
        let slots = tenants
            .get(&key.tenant)
            .filter(|slots| slots.established)
            .ok_or_else(|| SchedulerError::not_found(NotFoundKind::Tenant, &key.tenant))?;

        slots
            .queues
            .get(&key.queue)
            .and_then(Slot::visible)
            .cloned()
            .ok_or_else(|| SchedulerError::not_found(NotFoundKind::Queue, key))
    }

    /// Queues of a tenant in name order.
    pub fn list(&self, tenant: &TenantId) -> SchedulerResult<Vec<QueueHandle>> {
        let tenants = self.tenants.lock();
        let slots = tenants
            .get(tenant)
            .filter(|slots| slots.established)
            .ok_or_else(|| SchedulerError::not_found(NotFoundKind::Tenant, tenant))?;

        Ok(slots.queues.values().filter_map(Slot::visible).cloned().collect())
    }

    /// Number of visible queues across all tenants.
    pub fn len(&self) -> usize {
        self.tenants
            .lock()
            .values()
            .flat_map(|slots| slots.queues.values())
            .filter(|slot| slot.visible().is_some())
            .count()
    }

    /// Returns true if no queue is visible.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks a live queue as being removed and returns its handle.
    pub fn begin_remove(&self, key: &QueueKey) -> SchedulerResult<QueueHandle> {
        let mut tenants = self.tenants.lock();
        let slots = tenants
            .get_mut(&key.tenant)
            .filter(|slots| slots.established)
            .ok_or_else(|| SchedulerError::not_found(NotFoundKind::Tenant, &key.tenant))?;

        let slot = slots
            .queues
            .get_mut(&key.queue)
            .ok_or_else(|| SchedulerError::not_found(NotFoundKind::Queue, key))?;

        match slot {
            Slot::Pending(_) => Err(SchedulerError::not_found(NotFoundKind::Queue, key)),
            Slot::Removing(_) => Err(removal_in_progress(key)),
            Slot::Live(handle) => {
                let handle = handle.clone();
                *slot = Slot::Removing(handle.clone());
                Ok(handle)
            }
        }
    }

    /// Puts a queue being removed back to live.
    pub fn restore(&self, key: &QueueKey) {
        let mut tenants = self.tenants.lock();
        if let Some(slot) = tenants
            .get_mut(&key.tenant)
            .and_then(|slots| slots.queues.get_mut(&key.queue))
        {
            if let Slot::Removing(handle) = slot {
                *slot = Slot::Live(handle.clone());
            }
        }
    }

    /// Drops a queue being removed. The tenant stays known.
    pub fn finish_remove(&self, key: &QueueKey) {
        let mut tenants = self.tenants.lock();
        if let Some(slots) = tenants.get_mut(&key.tenant) {
            if matches!(slots.queues.get(&key.queue), Some(Slot::Removing(_))) {
                slots.queues.remove(&key.queue);
            }
        }
    }

    /// Updates the state of a live queue.
    pub fn set_state(&self, key: &QueueKey, state: QueueState) -> SchedulerResult<QueueHandle> {
        let mut tenants = self.tenants.lock();
        let slots = tenants
            .get_mut(&key.tenant)
            .filter(|slots| slots.established)
            .ok_or_else(|| SchedulerError::not_found(NotFoundKind::Tenant, &key.tenant))?;

        match slots.queues.get_mut(&key.queue) {
            Some(Slot::Live(handle)) => {
                handle.state = state;
                Ok(handle.clone())
            }
            Some(Slot::Removing(_)) => Err(removal_in_progress(key)),
            Some(Slot::Pending(_)) | None => Err(SchedulerError::not_found(NotFoundKind::Queue, key)),
        }
    }

    /// Empties the registry and returns every live or removing handle.
    pub fn drain(&self) -> Vec<QueueHandle> {
        let mut tenants = self.tenants.lock();
        let handles = tenants
            .values()
            .flat_map(|slots| slots.queues.values())
            .filter_map(Slot::visible)
            .cloned()
            .collect();
        tenants.clear();
        handles
    }

    fn commit(&self, key: &QueueKey, handle: QueueHandle) {
        let mut tenants = self.tenants.lock();
        let slots = tenants.entry(key.tenant.clone()).or_default();
        slots.established = true;
        slots.queues.insert(key.queue.clone(), Slot::Live(handle));
    }

    fn release(&self, key: &QueueKey) {
        let mut tenants = self.tenants.lock();
        let Some(slots) = tenants.get_mut(&key.tenant) else {
            return;
        };
        if matches!(slots.queues.get(&key.queue), Some(Slot::Pending(_))) {
            slots.queues.remove(&key.queue);
        }
        if !slots.established && slots.queues.is_empty() {
            tenants.remove(&key.tenant);
        }
    }
}

fn removal_in_progress(key: &QueueKey) -> SchedulerError {
    SchedulerError::EngineUnavailable(format!("Deletion of {} is in progress", key))
}

/// A claimed registry key. Released on drop unless committed.
#[derive(Debug)]
#[must_use]
pub struct Reservation<'a> {
    registry: &'a QueueRegistry,
    key: QueueKey,
    committed: bool,
}

impl Reservation<'_> {
    /// The reserved key.
    pub fn key(&self) -> &QueueKey {
        &self.key
    }

    /// Makes the queue live under the reserved key.
    pub fn commit(mut self, handle: QueueHandle) {
        self.registry.commit(&self.key, handle);
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.release(&self.key);
        }
    }
}
