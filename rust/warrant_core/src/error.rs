//! Error types for the authorization directory.

use thiserror::Error;
use warrant_storage::StorageError;

use crate::types::{EntityKind, EntityRef};

/// Directory errors.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// An entity with the same normalized key already exists.
    #[error("{kind} already exists: {key}")]
    DuplicateKey {
        kind: EntityKind,
        key: String,
    },

    /// The referenced entity is not in the store.
    #[error("record does not exist: {0}")]
    RecordDoesNotExist(EntityRef),

    /// A membership or permission binding already exists.
    #[error("binding already exists: {0}")]
    BindingExists(String),

    /// An argument resolved to the wrong kind of entity.
    #[error("invalid argument type: expected {expected}, found {found}")]
    InvalidArgumentType {
        expected: &'static str,
        found: EntityKind,
    },

    /// Email failed syntactic validation.
    #[error("invalid email address: {0:?}")]
    InvalidAddress(String),

    /// Name is empty after trimming or contains control characters.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A stored record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),
}

impl AuthzError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, AuthzError::RecordDoesNotExist(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(
            self,
            AuthzError::DuplicateKey { .. } | AuthzError::BindingExists(_)
        )
    }
}

/// Result type for directory operations.
pub type Result<T> = std::result::Result<T, AuthzError>;
