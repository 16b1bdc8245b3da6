//! `warrant_core` — authorization directory.
//!
//! Identities, groups and permissions connected by membership and grant
//! bindings, with cached permission resolution whose entries are swept
//! precisely when a fact they were computed from changes.
//!
//! Modules:
//! - `types`     — entities, references and binding records
//! - `keys`      — key normalization and binding key layout
//! - `store`     — entity and binding writes, cascading deletes, listing
//! - `active`    — active-flag propagation onto memberships
//! - `resolve`   — cached queries (groups, permissions, membership)
//! - `cache`     — dependency-tracked cache and its backends
//! - `config`    — JSON configuration
//! - `directory` — the [`Directory`] handle tying it together
//!
//! # Example
//!
//! ```rust
//! use warrant_core::Directory;
//!
//! let dir = Directory::in_memory().unwrap();
//! let alice = dir.create_identity("alice@example.com").unwrap();
//! let admins = dir.create_group("Admins", None).unwrap();
//! let deploy = dir.create_permission("deploy", None).unwrap();
//! dir.bind_membership(&alice, &admins).unwrap();
//! dir.bind_permission(&deploy, &admins).unwrap();
//!
//! assert!(dir.has_permission(&alice, &deploy).unwrap());
//! dir.unbind_membership(&alice, &admins).unwrap();
//! assert!(!dir.has_permission(&alice, &deploy).unwrap());
//! ```

pub mod active;
pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod keys;
pub mod resolve;
pub mod store;
pub mod types;

pub use cache::{CacheBackend, CacheError, CacheStats, DependencyCache, LocalCache};
pub use config::DirectoryConfig;
pub use directory::Directory;
pub use error::{AuthzError, Result};
pub use types::{
    AttrValue, EntityArg, EntityKind, EntityRef, Group, Identity, MembershipBinding, Permission,
    PermissionBinding, Subject, SubjectRef,
};
