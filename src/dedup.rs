use log::debug;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Tracks which plates currently have a lookup running against the summons
/// directory. Keys are compared exactly as submitted.
#[derive(Debug, Default)]
pub struct DedupGuard {
    in_flight: Mutex<HashSet<String>>,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn keys(&self) -> MutexGuard<'_, HashSet<String>> {
        // Every critical section leaves the set consistent; poisoning is ignored.
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `key` as in flight. Returns `false` if it already was.
    pub fn try_acquire(&self, key: &str) -> bool {
        let acquired = self.keys().insert(key.to_string());
        if !acquired {
            debug!("Lookup for {} already in flight", key);
        }
        acquired
    }

    pub fn release(&self, key: &str) {
        self.keys().remove(key);
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.keys().contains(key)
    }

    /// Scoped form of [`try_acquire`](Self::try_acquire): the returned permit
    /// releases `key` when dropped, which covers early returns, panics and a
    /// cancelled request future alike.
    pub fn acquire(self: &Arc<Self>, key: &str) -> Option<InFlight> {
        if self.try_acquire(key) {
            Some(InFlight {
                guard: Arc::clone(self),
                key: key.to_string(),
            })
        } else {
            None
        }
    }
}

#[derive(Debug)]
pub struct InFlight {
    guard: Arc<DedupGuard>,
    key: String,
}

impl InFlight {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.guard.release(&self.key);
    }
}
