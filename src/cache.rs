//! Memoizing read-through cache.
//!
//! A standalone collaborator, not wired into the deadline engine: callers
//! that look up expensive per-key state from inside deadline handlers (or
//! anywhere else) get the usual read-through contract, with the compute
//! function guaranteed to run **at most once per key** no matter how many
//! threads race the first lookup.
//!
//! Each key owns a slot with its own lock, so lookups for distinct keys
//! never serialize against each other beyond a brief registry access. A
//! failed or panicking compute caches nothing; the next lookup retries.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::CacheComputeError;

/// Per-key value slot. `None` until a compute succeeds.
struct Slot<V> {
    value: RwLock<Option<V>>,
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self {
            value: RwLock::new(None),
        }
    }
}

/// A key/value cache that computes each value at most once.
///
/// Values are handed out by clone; wrap expensive values in an `Arc` at the
/// caller if cloning them is too costly.
pub struct ReadThroughCache<K, V> {
    slots: Mutex<HashMap<K, Arc<Slot<V>>>>,
}

impl<K, V> Default for ReadThroughCache<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> ReadThroughCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`, running `compute` to produce it on the
    /// first lookup.
    ///
    /// Concurrent callers for the same key block on the slot until the one
    /// compute finishes; callers for other keys are unaffected. A panic in
    /// `compute` propagates to its caller and caches nothing.
    pub fn get(&self, key: &K, compute: impl FnOnce(&K) -> V) -> V {
        let slot = self.slot(key);
        if let Some(value) = slot.value.read().as_ref() {
            return value.clone();
        }

        let mut guard = slot.value.write();
        // A racing caller may have computed while we waited for the lock.
        if let Some(value) = guard.as_ref() {
            return value.clone();
        }
        let value = compute(key);
        *guard = Some(value.clone());
        value
    }

    /// Fallible variant of [`get`](Self::get).
    ///
    /// A compute failure is returned to the caller that ran it and nothing
    /// is cached, so a later lookup runs `compute` again.
    ///
    /// # Errors
    ///
    /// [`CacheComputeError`] wrapping whatever `compute` returned.
    pub fn try_get<E>(
        &self,
        key: &K,
        compute: impl FnOnce(&K) -> Result<V, E>,
    ) -> Result<V, CacheComputeError<E>>
    where
        E: std::error::Error,
    {
        let slot = self.slot(key);
        if let Some(value) = slot.value.read().as_ref() {
            return Ok(value.clone());
        }

        let mut guard = slot.value.write();
        if let Some(value) = guard.as_ref() {
            return Ok(value.clone());
        }
        let value = compute(key).map_err(CacheComputeError)?;
        *guard = Some(value.clone());
        Ok(value)
    }

    /// Looks up or creates the slot for `key`.
    fn slot(&self, key: &K) -> Arc<Slot<V>> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get(key) {
            return Arc::clone(slot);
        }
        let slot = Arc::new(Slot::default());
        slots.insert(key.clone(), Arc::clone(&slot));
        slot
    }
}

impl<K, V> std::fmt::Debug for ReadThroughCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("keys", &self.slots.lock().len())
            .finish()
    }
}
