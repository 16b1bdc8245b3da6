//! In-process LRU cache backend.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;

use super::{decode_set, encode_set, is_dependants_key, CacheBackend, CacheError, DependantSet};

type Entries = LruCache<String, Vec<u8>>;

/// Bounded LRU over byte values, guarded by one mutex.
///
/// Holding the lock across read-modify-write makes [`CacheBackend::add_to_set`]
/// and [`CacheBackend::set_tracked`] atomic. When a dependants set is
/// evicted, every derived key it lists is dropped with it, so no surviving
/// value loses its invalidation path.
pub struct LocalCache {
    entries: Mutex<Entries>,
}

impl LocalCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock()
            .map(|entries| entries.contains(key))
            .unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Entries>, CacheError> {
        self.entries
            .lock()
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }
}

/// Insert under the lock, cascading the eviction of a dependants set.
fn put(entries: &mut Entries, key: String, value: Vec<u8>) {
    let Some((evicted, bytes)) = entries.push(key.clone(), value) else {
        return;
    };
    if evicted == key || !is_dependants_key(&evicted) {
        return;
    }
    let orphans: DependantSet = match decode_set(&bytes) {
        Ok(set) => set,
        Err(e) => {
            tracing::warn!(key = %evicted.escape_debug(), error = %e, "evicted undecodable dependants set, clearing");
            entries.clear();
            return;
        }
    };
    for orphan in &orphans {
        entries.pop(orphan.as_str());
    }
    tracing::debug!(count = orphans.len(), "evicted dependants set with its derived keys");
}

impl CacheBackend for LocalCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError> {
        let mut entries = self.lock()?;
        put(&mut entries, key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.lock()?.pop(key);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        self.lock()?.clear();
        Ok(())
    }

    fn add_to_set(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut entries = self.lock()?;
        let mut set = match entries.get(key) {
            Some(bytes) => decode_set(bytes)?,
            None => DependantSet::new(),
        };
        if set.insert(member.to_string()) {
            put(&mut entries, key.to_string(), encode_set(&set)?);
        }
        Ok(())
    }

    fn set_tracked(
        &self,
        key: &str,
        value: Vec<u8>,
        dependant_sets: &[String],
    ) -> Result<(), CacheError> {
        let mut entries = self.lock()?;
        for set_key in dependant_sets {
            let mut set = match entries.get(set_key.as_str()) {
                Some(bytes) => decode_set(bytes)?,
                None => DependantSet::new(),
            };
            if set.insert(key.to_string()) {
                put(&mut entries, set_key.clone(), encode_set(&set)?);
            }
        }
        put(&mut entries, key.to_string(), value);
        // Registering a later set may have evicted an earlier one.
        if !dependant_sets
            .iter()
            .all(|set_key| entries.contains(set_key.as_str()))
        {
            entries.pop(key);
        }
        Ok(())
    }
}
