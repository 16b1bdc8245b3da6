//! `warrant_storage` — embedded key-value persistence for the warrant directory.
//!
//! The authorization core treats its store as an external collaborator that
//! offers point reads and writes, an atomic insert-if-absent primitive, and
//! ordered prefix scans. This crate defines that contract ([`KvBackend`] /
//! [`KvTree`]) and ships two implementations:
//!
//! - [`RedbStore`]: durable, ACID, built on redb.
//! - [`MemoryStore`]: process-local ordered maps, for tests and ephemeral use.
//!
//! # Example
//!
//! ```rust,no_run
//! use warrant_storage::{Batch, KvBackend, KvTree, RedbStore};
//!
//! let store = RedbStore::open("/var/lib/warrant/directory.redb").unwrap();
//! let groups = store.tree("groups").unwrap();
//!
//! // Only the first writer wins.
//! assert!(groups.insert_if_absent(b"admins", b"{}").unwrap());
//! assert!(!groups.insert_if_absent(b"admins", b"{}").unwrap());
//!
//! // Write a record and its index entry together, guarded on the record key.
//! let mut batch = Batch::new();
//! batch.insert(b"member\x1fa@x.com\x1fadmins", b"");
//! batch.insert(b"member_of\x1fadmins\x1fa@x.com", b"");
//! groups.commit_if_absent(b"member\x1fa@x.com\x1fadmins", &batch).unwrap();
//! ```
//!
//! # Modules
//!
//! - `backend` — the [`KvBackend`] / [`KvTree`] traits and [`Batch`]
//! - `error`   — [`StorageError`]
//! - `redb_store` — durable backend
//! - `memory`  — in-process backend

mod backend;
mod error;
mod memory;
mod redb_store;

pub use backend::{prefix_upper_bound, Batch, BatchOp, KvBackend, KvTree};
pub use error::{Result, StorageError};
pub use memory::{MemoryStore, MemoryTree};
pub use redb_store::{RedbStore, RedbTree};

/// Re-export commonly used types for convenience.
pub mod prelude {
    pub use crate::{Batch, KvBackend, KvTree, MemoryStore, RedbStore, StorageError};
}
