//! Per-entity FIFO locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

type EntityMutex = Arc<tokio::sync::Mutex<()>>;

/// Lazily created async mutexes keyed by entity name.
///
/// Waiters are served in arrival order. A lock is dropped from the map once
/// no guard or waiter references it.
#[derive(Clone, Default)]
pub(crate) struct EntityLocks {
    locks: Arc<Mutex<HashMap<String, EntityMutex>>>,
}

impl EntityLocks {
    pub(crate) async fn acquire(&self, entity: &str) -> EntityGuard {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(entity.to_string())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        EntityGuard {
            guard: Some(guard),
            entity: entity.to_string(),
            locks: self.clone(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive hold on one entity.
pub(crate) struct EntityGuard {
    guard: Option<OwnedMutexGuard<()>>,
    entity: String,
    locks: EntityLocks,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self
            .locks
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.entity)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.entity);
        }
    }
}
