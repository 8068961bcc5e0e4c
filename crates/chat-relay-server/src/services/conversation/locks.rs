use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::models::chat::ConversationId;

/// One async mutex per conversation id.
///
/// Serializes the load -> upstream -> commit round trip of a single
/// conversation while different conversations proceed independently.
/// Entries are dropped again once nobody holds or waits on them.
#[derive(Clone, Default)]
pub struct ConversationLocks {
    locks: Arc<DashMap<ConversationId, Arc<Mutex<()>>>>,
}

/// Held for the duration of one exchange
pub struct ConversationGuard {
    id: ConversationId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, id: &ConversationId) -> ConversationGuard {
        // Declared before the wait so a cancelled waiter drops its Arc first
        let _waiter = Waiter {
            id,
            locks: &self.locks,
        };
        let lock = self
            .locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;
        ConversationGuard {
            id: id.clone(),
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Number of conversations currently locked or waited on
    pub fn active(&self) -> usize {
        self.locks.len()
    }
}

/// Cleans up after a waiter whose `acquire` future is dropped mid-wait
struct Waiter<'a> {
    id: &'a ConversationId,
    locks: &'a DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        release_if_idle(self.locks, self.id);
    }
}

impl Drop for ConversationGuard {
    fn drop(&mut self) {
        // Release the mutex first so the guard's Arc no longer counts
        self.guard.take();
        release_if_idle(&self.locks, &self.id);
    }
}

/// Only the map's own reference left means no holder and no waiter
fn release_if_idle(locks: &DashMap<ConversationId, Arc<Mutex<()>>>, id: &ConversationId) {
    locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
}
