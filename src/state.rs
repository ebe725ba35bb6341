//! Concurrent, memory-accounted key-value projection store.

use crate::config::{StorageConfig, StorageStrategy};
use crate::error::StateError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

enum Slot<V> {
    Heap(V),
    Compressed(Vec<u8>),
}

struct Stored<V> {
    slot: Slot<V>,
    size: u64,
}

/// A concurrent key-value projection with byte accounting.
///
/// Values are kept according to the configured [`StorageStrategy`]; callers
/// use the same API either way. The accounted size of the repository is the
/// sum of the stored sizes of all live values (serialized JSON length for
/// [`StorageStrategy::Heap`], compressed length for
/// [`StorageStrategy::Compressed`]). The counter is adjusted while the
/// entry's shard is locked, so concurrent writers of the same key never
/// double count or lose an update.
///
/// Once [`close`](StateRepository::close)d a repository stays closed, and
/// every operation quietly returns `None`, `0` or nothing.
///
/// # Examples
///
/// ```
/// use channelfold::StateRepository;
///
/// let repo = StateRepository::<String>::in_memory();
/// assert_eq!(repo.put("a", "1".to_string()).unwrap(), None);
/// assert_eq!(repo.put("a", "2".to_string()).unwrap(), Some("1".to_string()));
/// assert_eq!(repo.get("a"), Some("2".to_string()));
///
/// repo.close();
/// assert_eq!(repo.get("a"), None);
/// assert_eq!(repo.size(), 0);
/// ```
pub struct StateRepository<V> {
    entries: DashMap<String, Stored<V>>,
    bytes_used: AtomicU64,
    closed: AtomicBool,
    config: StorageConfig,
}

impl<V> fmt::Debug for StateRepository<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateRepository")
            .field("strategy", &self.config.strategy)
            .field("entries", &self.entries.len())
            .field("bytes_used", &self.bytes_used.load(Ordering::Relaxed))
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V> StateRepository<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    pub fn new(config: StorageConfig) -> Self {
        StateRepository {
            entries: DashMap::new(),
            bytes_used: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            config,
        }
    }

    /// An unbounded repository keeping values in process memory.
    pub fn in_memory() -> Self {
        StateRepository::new(StorageConfig::heap())
    }

    pub fn strategy(&self) -> StorageStrategy {
        self.config.strategy
    }

    /// Store `value` under `key`, returning the value it replaced.
    ///
    /// A closed repository ignores the call and returns `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::CapacityExceeded`] if the configured byte bound
    /// would be exceeded, or a serialization/compression error. The
    /// repository is unchanged in either case.
    pub fn put(&self, key: impl Into<String>, value: V) -> Result<Option<V>, StateError> {
        if self.is_closed() {
            return Ok(None);
        }
        let key = key.into();
        let stored = self.store(&key, value)?;

        let entry = self.entries.entry(key);
        // `close` may have run while this waited for the shard lock.
        if self.is_closed() {
            return Ok(None);
        }
        match entry {
            Entry::Occupied(mut occupied) => {
                self.account(occupied.key(), occupied.get().size, stored.size)?;
                let previous = occupied.insert(stored);
                Ok(self.load(occupied.key(), &previous.slot))
            }
            Entry::Vacant(vacant) => {
                self.account(vacant.key(), 0, stored.size)?;
                vacant.insert(stored);
                Ok(None)
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        if self.is_closed() {
            return None;
        }
        let stored = self.entries.get(key)?;
        self.load(key, &stored.slot)
    }

    /// Remove `key`, returning the value it held.
    pub fn remove(&self, key: &str) -> Option<V> {
        if self.is_closed() {
            return None;
        }
        let removed = self.entries.remove_if(key, |_, stored| {
            if self.is_closed() {
                return false;
            }
            self.bytes_used.fetch_sub(stored.size, Ordering::AcqRel);
            true
        });
        let (key, stored) = removed?;
        self.load(&key, &stored.slot)
    }

    /// Number of stored keys, `0` once closed.
    pub fn size(&self) -> usize {
        if self.is_closed() {
            return 0;
        }
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Accounted size in bytes of all stored values, `0` once closed.
    pub fn bytes_used(&self) -> u64 {
        if self.is_closed() {
            return 0;
        }
        self.bytes_used.load(Ordering::Acquire)
    }

    /// Lazily iterate over the stored keys, in no particular order.
    ///
    /// Each call starts a fresh pass. Keys written concurrently may or may
    /// not be observed. Do not write to the repository from the thread that
    /// holds the iterator: it keeps shard read locks while it runs.
    pub fn keys(&self) -> impl Iterator<Item = String> + '_ {
        self.live_entries()
            .into_iter()
            .flatten()
            .map(|entry| entry.key().clone())
    }

    /// Lazily iterate over stored `(key, value)` pairs, in no particular order.
    ///
    /// The same locking caveat as [`keys`](StateRepository::keys) applies.
    pub fn iter(&self) -> impl Iterator<Item = (String, V)> + '_ {
        self.live_entries().into_iter().flatten().filter_map(|entry| {
            let value = self.load(entry.key(), &entry.value().slot)?;
            Some((entry.key().clone(), value))
        })
    }

    /// Remove every entry, resetting the byte counter.
    pub fn clear(&self) {
        if self.is_closed() {
            return;
        }
        self.entries.retain(|_, stored| {
            if self.is_closed() {
                return true;
            }
            self.bytes_used.fetch_sub(stored.size, Ordering::AcqRel);
            false
        });
    }

    /// Close the repository and release its entries. Idempotent.
    ///
    /// Writers racing with `close` re-check the flag under the entry's shard
    /// lock, so no entry or byte count survives it.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!(
            "closing state repository with {} entries, {} bytes",
            self.entries.len(),
            self.bytes_used.load(Ordering::Acquire)
        );
        self.entries.clear();
        self.bytes_used.store(0, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn live_entries(&self) -> Option<dashmap::iter::Iter<'_, String, Stored<V>>> {
        (!self.is_closed()).then(|| self.entries.iter())
    }

    /// Move the counter from `old_size` to `new_size` for one entry.
    ///
    /// Must be called with the entry's shard locked.
    fn account(&self, key: &str, old_size: u64, new_size: u64) -> Result<(), StateError> {
        if new_size <= old_size {
            self.bytes_used
                .fetch_sub(old_size - new_size, Ordering::AcqRel);
            return Ok(());
        }
        let delta = new_size - old_size;
        match self.config.max_bytes {
            None => {
                self.bytes_used.fetch_add(delta, Ordering::AcqRel);
                Ok(())
            }
            Some(max_bytes) => self
                .bytes_used
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                    used.checked_add(delta).filter(|total| *total <= max_bytes)
                })
                .map(|_| ())
                .map_err(|used| StateError::CapacityExceeded {
                    key: key.to_string(),
                    requested: used.saturating_add(delta),
                    max_bytes,
                }),
        }
    }

    fn store(&self, key: &str, value: V) -> Result<Stored<V>, StateError> {
        let json = serde_json::to_vec(&value).map_err(|source| StateError::Serialization {
            key: key.to_string(),
            source,
        })?;
        match self.config.strategy {
            StorageStrategy::Heap => Ok(Stored {
                size: json.len() as u64,
                slot: Slot::Heap(value),
            }),
            StorageStrategy::Compressed => {
                let compressed = zstd::bulk::compress(&json, self.config.compression_level)
                    .map_err(|source| StateError::Compression {
                        key: key.to_string(),
                        source,
                    })?;
                Ok(Stored {
                    size: compressed.len() as u64,
                    slot: Slot::Compressed(compressed),
                })
            }
        }
    }

    fn load(&self, key: &str, slot: &Slot<V>) -> Option<V> {
        match slot {
            Slot::Heap(value) => Some(value.clone()),
            Slot::Compressed(bytes) => {
                let json = match zstd::stream::decode_all(bytes.as_slice()) {
                    Ok(json) => json,
                    Err(e) => {
                        log::error!("state repository: cannot decompress value of '{key}': {e}");
                        return None;
                    }
                };
                match serde_json::from_slice(&json) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        log::error!("state repository: cannot decode value of '{key}': {e}");
                        None
                    }
                }
            }
        }
    }
}
