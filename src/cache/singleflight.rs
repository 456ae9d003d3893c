//! Per-key async lock that keeps concurrent misses from recomputing the same value.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Default, Clone)]
pub struct Flight {
    inner: Slots,
}

/// Held while the owner computes the value for `key`.
pub struct FlightGuard {
    key: String,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Slots,
}

impl Flight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other task holds `key`, then hold it.
    pub async fn acquire(&self, key: &str) -> FlightGuard {
        let slot = {
            let mut map = self.inner.lock();
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = slot.clone().lock_owned().await;
        FlightGuard {
            key: key.to_string(),
            slot,
            guard: Some(guard),
            slots: self.inner.clone(),
        }
    }

    /// Keys with an owner or waiters.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.slots.lock();
        // Only the map and this guard reference the slot: nobody is waiting.
        if Arc::strong_count(&self.slot) == 2 {
            map.remove(&self.key);
        }
    }
}
