//! Keyed async locks.
//!
//! Port allocation derives the next port from the current instance
//! count, so two concurrent starts for the same type would race on the
//! same computed port. `KeyedLocks` turns all mutations for a key into
//! a single logical queue while keys stay independent of each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

/// A map of named async mutexes, created lazily on first use.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (or create) the lock for a key. Callers hold the returned
    /// guard handle and `.lock().await` it for the critical section.
    pub fn acquire(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().expect("keyed locks poisoned");
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
