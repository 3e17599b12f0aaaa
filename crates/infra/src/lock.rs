//! Per-key mutual exclusion with bounded waits.
//!
//! The ledger serializes read-validate-write per purchase order and mutations per
//! goods receipt. Waiting is bounded: a caller that cannot get the key within the
//! timeout gets `ReceivingError::Busy` and may retry.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use grnrecon_core::{ReceivingError, ReceivingResult};

/// A set of independently lockable keys.
///
/// Only the keys currently held are stored, so the table stays small no matter
/// how many purchase orders exist.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    name: &'static str,
    held: Mutex<HashSet<K>>,
    released: Condvar,
}

impl<K> KeyedLocks<K>
where
    K: Clone + Eq + Hash + core::fmt::Display,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            held: Mutex::new(HashSet::new()),
            released: Condvar::new(),
        }
    }

    /// Acquire `key`, waiting at most `timeout`.
    pub fn acquire(&self, key: K, timeout: Duration) -> ReceivingResult<KeyedGuard<'_, K>> {
        let deadline = Instant::now() + timeout;
        let mut held = self
            .held
            .lock()
            .map_err(|_| ReceivingError::storage(format!("{} lock table poisoned", self.name)))?;

        while held.contains(&key) {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(lock = self.name, %key, ?timeout, "lock acquisition timed out");
                return Err(ReceivingError::busy(format!(
                    "{} {key} is locked by another request",
                    self.name
                )));
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(|_| {
                    ReceivingError::storage(format!("{} lock table poisoned", self.name))
                })?;
            held = guard;
        }

        held.insert(key.clone());
        Ok(KeyedGuard { locks: self, key })
    }

    /// Whether `key` is currently held (diagnostics/tests).
    pub fn is_held(&self, key: &K) -> bool {
        self.held.lock().map(|h| h.contains(key)).unwrap_or(false)
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct KeyedGuard<'a, K>
where
    K: Clone + Eq + Hash,
{
    locks: &'a KeyedLocks<K>,
    key: K,
}

impl<K> Drop for KeyedGuard<'_, K>
where
    K: Clone + Eq + Hash,
{
    fn drop(&mut self) {
        // A poisoned table still has to release the key, otherwise it stays locked forever.
        let mut held = match self.locks.held.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&self.key);
        self.locks.released.notify_all();
    }
}
