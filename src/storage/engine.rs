//! Thread-Safe Sharded Storage Engine
//!
//! This module implements the associative container behind the database: a
//! concurrent map keyed by `Bytes`. The database keeps two of them, one for
//! entities and one for expiry instants.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: Instead of one big lock, keys are spread over shards to
//!    reduce contention between connections.
//! 2. **RwLock**: Multiple concurrent readers per shard, exclusive writers.
//! 3. **Write Policies**: Besides plain upsert, insert-only and update-only writes
//!    are atomic within their shard, so `SET NX` / `SET XX` cannot race a
//!    concurrent writer between the existence check and the write.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   StorageEngine<V>                          │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │           │
//! │  │ HashMap │ │ HashMap │ │ HashMap │ │ HashMap │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Number of shards for the storage engine.
/// More shards = less lock contention, but more memory overhead.
const NUM_SHARDS: usize = 64;

type Shard<V> = RwLock<HashMap<Bytes, V>>;

/// A sharded concurrent map with upsert, insert-only and update-only writes.
///
/// Values are cloned out on read, so `V` is expected to be cheap to clone
/// (`Bytes`-backed entities, `SystemTime`s).
///
/// # Example
///
/// ```
/// use quillkv::storage::StorageEngine;
/// use bytes::Bytes;
///
/// let engine: StorageEngine<Bytes> = StorageEngine::new();
///
/// assert_eq!(engine.put(Bytes::from("name"), Bytes::from("Ariz")), 1);
/// assert_eq!(engine.put_if_absent(Bytes::from("name"), Bytes::from("other")), 0);
/// assert_eq!(engine.get(b"name"), Some(Bytes::from("Ariz")));
/// ```
pub struct StorageEngine<V> {
    /// Sharded storage for reduced lock contention
    shards: Vec<Shard<V>>,

    /// Total number of keys (approximate under concurrent writes)
    key_count: AtomicU64,
}

impl<V> std::fmt::Debug for StorageEngine<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("key_count", &self.key_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V: Clone> Default for StorageEngine<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> StorageEngine<V> {
    /// Creates a new, empty storage engine.
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS).map(|_| RwLock::new(HashMap::new())).collect();

        Self {
            shards,
            key_count: AtomicU64::new(0),
        }
    }

    /// Determines which shard a key belongs to.
    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % NUM_SHARDS
    }

    // A panic while a shard lock is held leaves the map itself intact (every
    // mutation is a single HashMap call), so poisoning is ignored.
    fn read(&self, key: &[u8]) -> RwLockReadGuard<'_, HashMap<Bytes, V>> {
        self.shards[self.shard_index(key)]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, key: &[u8]) -> RwLockWriteGuard<'_, HashMap<Bytes, V>> {
        self.shards[self.shard_index(key)]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts or overwrites a key.
    ///
    /// # Returns
    ///
    /// Always `1`: an upsert changes state whether or not the key existed.
    pub fn put(&self, key: Bytes, value: V) -> usize {
        let mut shard = self.write(&key);
        if shard.insert(key, value).is_none() {
            self.key_count.fetch_add(1, Ordering::Relaxed);
        }
        1
    }

    /// Inserts a key only if it is absent.
    ///
    /// # Returns
    ///
    /// `1` if the key was inserted, `0` if it already existed.
    pub fn put_if_absent(&self, key: Bytes, value: V) -> usize {
        let mut shard = self.write(&key);
        if shard.contains_key(&key) {
            return 0;
        }
        shard.insert(key, value);
        self.key_count.fetch_add(1, Ordering::Relaxed);
        1
    }

    /// Overwrites a key only if it already exists.
    ///
    /// # Returns
    ///
    /// `1` if the key was updated, `0` if it was absent.
    pub fn put_if_exists(&self, key: Bytes, value: V) -> usize {
        let mut shard = self.write(&key);
        match shard.get_mut(&key) {
            Some(slot) => {
                *slot = value;
                1
            }
            None => 0,
        }
    }

    /// Returns a clone of the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> Option<V> {
        self.read(key).get(key).cloned()
    }

    /// Removes a key.
    ///
    /// # Returns
    ///
    /// `1` if the key was removed, `0` if it didn't exist.
    pub fn remove(&self, key: &[u8]) -> usize {
        let mut shard = self.write(key);
        if shard.remove(key).is_some() {
            self.key_count.fetch_sub(1, Ordering::Relaxed);
            1
        } else {
            0
        }
    }

    /// Removes a key only if its current value satisfies `predicate`.
    ///
    /// The check and the removal happen under the same shard lock.
    pub fn remove_if(&self, key: &[u8], predicate: impl FnOnce(&V) -> bool) -> usize {
        let mut shard = self.write(key);
        match shard.get(key) {
            Some(value) if predicate(value) => {
                shard.remove(key);
                self.key_count.fetch_sub(1, Ordering::Relaxed);
                1
            }
            _ => 0,
        }
    }

    /// Returns the approximate number of keys.
    pub fn len(&self) -> u64 {
        self.key_count.load(Ordering::Relaxed)
    }

    /// Returns true if the engine holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
