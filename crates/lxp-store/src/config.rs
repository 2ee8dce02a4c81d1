use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::layout::validate_name;

/// Configuration for opening a [`Store`](crate::Store).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory holding `REPOS/`.
    pub root: PathBuf,
    /// Maximum number of decoded tuples each bucket keeps cached.
    pub cache_capacity: usize,
    /// Start the filesystem watcher that invalidates bucket caches.
    pub watch: bool,
    /// `fsync` record, shadow, and index files after writing them.
    pub sync_writes: bool,
    /// Repository holding the type registry.
    pub system_repository: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            cache_capacity: 1024,
            watch: true,
            sync_writes: false,
            system_repository: "__SYSTEM".to_string(),
        }
    }
}

impl StoreConfig {
    /// Default configuration rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Same configuration without the filesystem watcher.
    pub fn without_watcher(mut self) -> Self {
        self.watch = false;
        self
    }

    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| StoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> StoreResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StoreError::env("read config", path, e))?;
        Self::from_toml_str(&text)
    }

    /// Reject settings the store cannot run with.
    pub fn validate(&self) -> StoreResult<()> {
        if self.cache_capacity == 0 {
            return Err(StoreError::Config("cache_capacity must be at least 1".into()));
        }
        validate_name(&self.system_repository)
            .map_err(|e| StoreError::Config(format!("system_repository: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = StoreConfig::new("/data/store");
        assert_eq!(c.root, PathBuf::from("/data/store"));
        assert_eq!(c.cache_capacity, 1024);
        assert!(c.watch);
        assert!(!c.sync_writes);
        assert_eq!(c.system_repository, "__SYSTEM");
        assert!(!c.clone().without_watcher().watch);
    }

    #[test]
    fn parse_partial_toml() {
        let c = StoreConfig::from_toml_str(
            r#"
            root = "/srv/lxp"
            cache_capacity = 64
            sync_writes = true
            "#,
        )
        .unwrap();
        assert_eq!(c.root, PathBuf::from("/srv/lxp"));
        assert_eq!(c.cache_capacity, 64);
        assert!(c.sync_writes);
        assert!(c.watch);
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = StoreConfig::from_toml_str("colour = \"blue\"").unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(StoreConfig::from_toml_str("cache_capacity = 0").is_err());
    }

    #[test]
    fn bad_system_repository_rejected() {
        assert!(StoreConfig::from_toml_str("system_repository = \"a/b\"").is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lxp.toml");
        std::fs::write(&path, "watch = false\n").unwrap();
        let c = StoreConfig::from_toml_file(&path).unwrap();
        assert!(!c.watch);
        assert!(StoreConfig::from_toml_file(&dir.path().join("missing.toml")).is_err());
    }
}
