use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// In-process exclusive locks keyed by record id.
///
/// Holders of different keys never wait on each other. Slots are dropped
/// once the last guard for a key is released.
#[derive(Debug, Default)]
pub struct RecordLocks {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl RecordLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(self: &Arc<Self>, key: &str) -> RecordGuard {
        let slot = {
            let mut slots = self.slots.lock();
            Arc::clone(
                slots
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = slot.lock_owned().await;
        RecordGuard {
            key: key.to_string(),
            locks: Arc::clone(self),
            guard: Some(guard),
        }
    }

    pub fn held_keys(&self) -> usize {
        self.slots.lock().len()
    }

    fn release(&self, key: &str) {
        let mut slots = self.slots.lock();
        let idle = slots
            .get(key)
            .map(|slot| Arc::strong_count(slot) == 1)
            .unwrap_or(false);
        if idle {
            slots.remove(key);
        }
    }
}

pub struct RecordGuard {
    key: String,
    locks: Arc<RecordLocks>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks.release(&self.key);
    }
}
