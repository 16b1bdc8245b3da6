//! Dependency-tracked result cache.
//!
//! Every cached query result is stored under a derived key and registered
//! in the *dependants set* of each entity it was computed from. Mutating an
//! entity sweeps its dependants set, deleting every derived key listed
//! there, then deletes the set itself.
//!
//! Writes register back-edges before storing the value. A crash in between
//! leaves a dangling back-edge (harmless) rather than a value no mutation
//! can reach. Cache backend failures never fail a query: reads degrade to
//! misses and writes are dropped, both logged at `warn`.

mod local;

pub use local::LocalCache;

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::keys::SEP;
use crate::types::EntityRef;

const DEPENDANTS: &str = "dependants";

/// Cache backend failure.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache codec error: {0}")]
    Codec(#[from] bincode::Error),
}

/// A string-keyed byte cache.
///
/// Backends may evict entries at any time; the dependency layer tolerates
/// every key disappearing.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    fn set(&self, key: &str, value: Vec<u8>) -> Result<(), CacheError>;

    fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Drop every entry.
    fn clear(&self) -> Result<(), CacheError>;

    /// Add `member` to the set stored at `key`.
    ///
    /// The provided implementation is read-modify-write across two calls,
    /// so concurrent adders to one set can lose a member. Backends able to
    /// do better override it.
    fn add_to_set(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut set = match self.get(key)? {
            Some(bytes) => decode_set(&bytes)?,
            None => DependantSet::new(),
        };
        if set.insert(member.to_string()) {
            self.set(key, encode_set(&set)?)?;
        }
        Ok(())
    }

    /// Store `value` under `key` after adding `key` to every set in
    /// `dependant_sets`.
    ///
    /// A value must never outlive any of its sets. The provided
    /// implementation stops before the write if a registration fails;
    /// backends that evict on their own override it so that an eviction
    /// during registration cannot strand the value.
    fn set_tracked(
        &self,
        key: &str,
        value: Vec<u8>,
        dependant_sets: &[String],
    ) -> Result<(), CacheError> {
        for set_key in dependant_sets {
            self.add_to_set(set_key, key)?;
        }
        self.set(key, value)
    }
}

/// Derived keys registered against one entity.
pub(crate) type DependantSet = BTreeSet<String>;

pub(crate) fn encode_set(set: &DependantSet) -> Result<Vec<u8>, CacheError> {
    Ok(bincode::serialize(set)?)
}

pub(crate) fn decode_set(bytes: &[u8]) -> Result<DependantSet, CacheError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Key of the dependants set of `entity`.
pub fn dependants_key(entity: &EntityRef) -> String {
    format!("{entity}{SEP}{DEPENDANTS}")
}

pub(crate) fn is_dependants_key(key: &str) -> bool {
    key.strip_suffix(DEPENDANTS)
        .is_some_and(|rest| rest.ends_with(SEP))
}

/// Derived key of a single-entity query, e.g. all groups of an identity.
pub fn derived_key(entity: &EntityRef, query: &str) -> String {
    format!("{entity}{SEP}{query}")
}

/// Derived key of a query relating two entities.
pub fn derived_pair_key(entity: &EntityRef, query: &str, other: &EntityRef) -> String {
    format!("{entity}{SEP}{query}{SEP}{other}")
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Derived keys deleted by invalidation sweeps.
    pub invalidated: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total > 0 {
            self.hits as f64 / total as f64
        } else {
            0.0
        }
    }
}

/// Dependency tracking over a [`CacheBackend`].
///
/// A disabled cache has no backend: fetches always miss and writes and
/// invalidations are no-ops.
pub struct DependencyCache {
    backend: Option<Arc<dyn CacheBackend>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidated: AtomicU64,
}

impl DependencyCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend: Some(backend),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self {
            backend: None,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidated: AtomicU64::new(0),
        }
    }

    /// In-process LRU cache bounded to `capacity` entries.
    pub fn local(capacity: NonZeroUsize) -> Self {
        Self::new(Arc::new(LocalCache::new(capacity)))
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Look up a cached result. Missing, unreadable and undecodable entries
    /// are all misses.
    pub fn fetch<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.backend.as_ref()?;
        let bytes = match backend.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key.escape_debug(), "cache miss");
                return None;
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key.escape_debug(), error = %e, "cache read failed");
                return None;
            }
        };
        match bincode::deserialize(&bytes) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key.escape_debug(), "cache hit");
                Some(value)
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(key = %key.escape_debug(), error = %e, "undecodable cache entry");
                None
            }
        }
    }

    /// Cache `value` under `key`, registering `key` with every entity in
    /// `dependencies` first. On a registration failure nothing is stored.
    pub fn store<T: Serialize>(&self, key: &str, value: &T, dependencies: &[EntityRef]) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        let bytes = match bincode::serialize(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key.escape_debug(), error = %e, "cache value not encodable");
                return;
            }
        };
        let sets: Vec<String> = dependencies.iter().map(dependants_key).collect();
        if let Err(e) = backend.set_tracked(key, bytes, &sets) {
            tracing::warn!(key = %key.escape_debug(), error = %e, "cache write failed");
        }
    }

    /// Register `derived_key` in the dependants set of each entity.
    ///
    /// Returns `false` if any registration failed.
    pub fn add_dependants(&self, derived_key: &str, entities: &[EntityRef]) -> bool {
        let Some(backend) = self.backend.as_ref() else {
            return false;
        };
        let mut registered = true;
        for entity in entities {
            if let Err(e) = backend.add_to_set(&dependants_key(entity), derived_key) {
                tracing::warn!(%entity, error = %e, "dependant registration failed");
                registered = false;
            }
        }
        registered
    }

    /// Sweep the dependants of each entity, then drop their sets.
    pub fn invalidate(&self, entities: &[EntityRef]) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        for entity in entities {
            let set_key = dependants_key(entity);
            let dependants = match backend.get(&set_key) {
                Ok(Some(bytes)) => match decode_set(&bytes) {
                    Ok(set) => set,
                    Err(e) => {
                        // The dependants are unknown; nothing cached is trustworthy.
                        tracing::warn!(%entity, error = %e, "undecodable dependants set, clearing cache");
                        self.clear(backend.as_ref());
                        continue;
                    }
                },
                Ok(None) => DependantSet::new(),
                Err(e) => {
                    tracing::warn!(%entity, error = %e, "dependants read failed");
                    continue;
                }
            };
            let mut swept = 0u64;
            let mut failed = false;
            for key in &dependants {
                match backend.delete(key) {
                    Ok(()) => swept += 1,
                    Err(e) => {
                        tracing::warn!(key = %key.escape_debug(), error = %e, "cache delete failed");
                        failed = true;
                    }
                }
            }
            // Keep the set while any listed key may still hold a value.
            if !failed {
                if let Err(e) = backend.delete(&set_key) {
                    tracing::warn!(%entity, error = %e, "dependants delete failed");
                }
            }
            self.invalidated.fetch_add(swept, Ordering::Relaxed);
            tracing::debug!(%entity, swept, "invalidated dependants");
        }
    }

    fn clear(&self, backend: &dyn CacheBackend) {
        if let Err(e) = backend.clear() {
            tracing::warn!(error = %e, "cache clear failed");
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.invalidated.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for DependencyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyCache")
            .field("enabled", &self.is_enabled())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests;
