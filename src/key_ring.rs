//! A client-side cache of keys.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::key::Key;
use crate::refresh::{RefreshEvent, RefreshListener};

/// A concurrent mapping from key ID to [`Key`].
///
/// A `KeyRing` is the client-side cache at the center of this crate: a
/// [`Refresher`](crate::Refresher) keeps it current by registering it as a
/// refresh listener, and a [`Resolver`](crate::Resolver) can consult and
/// populate it on demand. Cloning a `KeyRing` yields a handle to the same
/// underlying cache.
///
/// Keys without a key ID cannot be indexed and are silently skipped on
/// insertion.
#[derive(Clone, Default)]
pub struct KeyRing {
    keys: Arc<RwLock<HashMap<String, Key>>>,
}

impl KeyRing {
    /// Builds an empty `KeyRing`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a `KeyRing` holding the given initial keys.
    ///
    /// Keys without a key ID are skipped.
    pub fn with_keys<I>(initial: I) -> Self
    where
        I: IntoIterator<Item = Key>,
    {
        let ring = Self::new();
        ring.add(initial);
        ring
    }

    /// Returns the key with the given key ID, if present.
    pub fn get(&self, key_id: &str) -> Option<Key> {
        self.read().get(key_id).cloned()
    }

    /// Returns the number of keys currently in the ring.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` when the ring holds no keys.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Inserts keys into the ring by key ID, returning the number actually
    /// inserted.
    ///
    /// Keys without a key ID are skipped. The count includes keys that were
    /// already present, since those are overwritten with the new value.
    pub fn add<I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = Key>,
    {
        let mut ring = self.write();
        let mut inserted = 0;
        for key in keys {
            if !key.key_id().is_empty() {
                inserted += 1;
                ring.insert(key.key_id().to_owned(), key);
            }
        }

        inserted
    }

    /// Removes keys from the ring by key ID, returning the number actually
    /// removed. Unknown key IDs are ignored.
    pub fn remove<I, S>(&self, key_ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ring = self.write();
        let mut removed = 0;
        for key_id in key_ids {
            if ring.remove(key_id.as_ref()).is_some() {
                removed += 1;
            }
        }

        removed
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Key>> {
        self.keys.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Key>> {
        self.keys.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RefreshListener for KeyRing {
    fn on_refresh_event(&self, event: &RefreshEvent) {
        // Ignore events that represent no change to the set of keys.
        if event.err.is_some() || (event.keys.is_empty() && event.deleted.is_empty()) {
            return;
        }

        // One lock acquisition, so the event's upserts and deletes are
        // atomic with respect to other readers and writers.
        let mut ring = self.write();

        // Reinsert all keys, not just new ones, so that changed private-key
        // attributes of an unchanged key ID are picked up.
        for key in &event.keys {
            if !key.key_id().is_empty() {
                ring.insert(key.key_id().to_owned(), key.clone());
            }
        }

        for key in &event.deleted {
            ring.remove(key.key_id());
        }
    }
}

impl fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRing").field("len", &self.len()).finish()
    }
}
