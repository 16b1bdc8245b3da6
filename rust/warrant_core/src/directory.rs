//! The directory handle: storage trees, cache and policy in one place.
//!
//! Operations live beside their concern: entity and binding writes in
//! [`crate::store`], active-state propagation in [`crate::active`], and
//! cached queries in [`crate::resolve`].

use warrant_storage::{KvBackend, KvTree, MemoryStore, MemoryTree, RedbStore, RedbTree};

use crate::cache::DependencyCache;
use crate::config::DirectoryConfig;
use crate::error::Result;

pub(crate) const IDENTITIES: &str = "identities";
pub(crate) const GROUPS: &str = "groups";
pub(crate) const PERMISSIONS: &str = "permissions";
pub(crate) const BINDINGS: &str = "bindings";

/// Authorization directory over one storage backend.
///
/// All methods take `&self`; share a directory between threads with `Arc`.
pub struct Directory<T: KvTree> {
    pub(crate) identities: T,
    pub(crate) groups: T,
    pub(crate) permissions: T,
    pub(crate) bindings: T,
    pub(crate) cache: DependencyCache,
    pub(crate) validate_email: bool,
}

impl Directory<RedbTree> {
    /// Open a redb-backed directory as configured.
    pub fn open(config: &DirectoryConfig) -> Result<Self> {
        config.validate()?;
        let store = match &config.storage.path {
            Some(path) => RedbStore::open(path)?,
            None => RedbStore::open_temporary()?,
        };
        let directory =
            Self::with_backend(&store, config.build_cache()?, config.identity.validate_email)?;
        tracing::info!(
            path = ?config.storage.path,
            cache = directory.cache.is_enabled(),
            "directory opened"
        );
        Ok(directory)
    }
}

impl Directory<MemoryTree> {
    /// Non-durable directory with the default configuration.
    pub fn in_memory() -> Result<Self> {
        Self::in_memory_with(&DirectoryConfig::default())
    }

    pub fn in_memory_with(config: &DirectoryConfig) -> Result<Self> {
        config.validate()?;
        Self::with_backend(
            &MemoryStore::new(),
            config.build_cache()?,
            config.identity.validate_email,
        )
    }
}

impl<T: KvTree> Directory<T> {
    pub fn with_backend<B>(backend: &B, cache: DependencyCache, validate_email: bool) -> Result<Self>
    where
        B: KvBackend<Tree = T>,
    {
        Ok(Self {
            identities: backend.tree(IDENTITIES)?,
            groups: backend.tree(GROUPS)?,
            permissions: backend.tree(PERMISSIONS)?,
            bindings: backend.tree(BINDINGS)?,
            cache,
            validate_email,
        })
    }

    pub fn cache(&self) -> &DependencyCache {
        &self.cache
    }
}

impl<T: KvTree> std::fmt::Debug for Directory<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("cache", &self.cache)
            .field("validate_email", &self.validate_email)
            .finish_non_exhaustive()
    }
}
