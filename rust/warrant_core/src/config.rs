//! Directory configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::cache::DependencyCache;
use crate::error::{AuthzError, Result};

pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    pub storage: StorageConfig,
    pub cache: CacheConfig,
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// redb file. `None` opens a temporary database removed on drop.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Entry bound of the in-process LRU, dependants sets included.
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Reject identity emails that fail syntactic validation.
    pub validate_email: bool,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            validate_email: true,
        }
    }
}

impl DirectoryConfig {
    /// Parse and validate a config from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| AuthzError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| AuthzError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(AuthzError::Config(
                "cache.capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the dependency cache this config describes.
    pub fn build_cache(&self) -> Result<DependencyCache> {
        if !self.cache.enabled {
            return Ok(DependencyCache::disabled());
        }
        let capacity = NonZeroUsize::new(self.cache.capacity).ok_or_else(|| {
            AuthzError::Config("cache.capacity must be greater than zero".to_string())
        })?;
        Ok(DependencyCache::local(capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_object_uses_defaults() {
        let config = DirectoryConfig::from_json("{}").unwrap();
        assert_eq!(config, DirectoryConfig::default());
        assert!(config.cache.enabled);
        assert_eq!(config.cache.capacity, DEFAULT_CACHE_CAPACITY);
        assert!(config.identity.validate_email);
        assert!(config.storage.path.is_none());
    }

    #[test]
    fn parse_partial_sections() {
        let json = r#"{"cache":{"capacity":64},"storage":{"path":"/var/lib/warrant.redb"}}"#;
        let config = DirectoryConfig::from_json(json).unwrap();
        assert!(config.cache.enabled);
        assert_eq!(config.cache.capacity, 64);
        assert_eq!(
            config.storage.path.as_deref(),
            Some(Path::new("/var/lib/warrant.redb"))
        );
    }

    #[test]
    fn zero_capacity_is_rejected_when_enabled() {
        let err = DirectoryConfig::from_json(r#"{"cache":{"capacity":0}}"#).unwrap_err();
        assert!(matches!(err, AuthzError::Config(_)));

        let config =
            DirectoryConfig::from_json(r#"{"cache":{"enabled":false,"capacity":0}}"#).unwrap();
        assert!(!config.build_cache().unwrap().is_enabled());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = DirectoryConfig::from_json("{cache:").unwrap_err();
        assert!(matches!(err, AuthzError::Config(_)));
    }

    #[test]
    fn from_file_reads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warrant.json");
        std::fs::write(&path, r#"{"identity":{"validate_email":false}}"#).unwrap();
        let config = DirectoryConfig::from_file(&path).unwrap();
        assert!(!config.identity.validate_email);

        let missing = DirectoryConfig::from_file(dir.path().join("absent.json"));
        assert!(matches!(missing, Err(AuthzError::Config(_))));
    }
}
