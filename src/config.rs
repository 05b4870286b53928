use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How lookups treat two contents that share a [`HashId`](crate::HashId).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupMode {
    /// Keep every descriptor, compare full hashes, and report collisions as
    /// `AmbiguousHash`.
    #[default]
    Strict,
    /// Key purely by `HashId`. The first blob stored under an id wins and a
    /// colliding put is treated as a duplicate.
    Fingerprint,
}

/// Configuration shared by every store opened under one root directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the `.blobs` / `.blobs-index` file pairs
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default)]
    pub lookup: LookupMode,
    /// Call `sync_data` after every log and index append
    #[serde(default)]
    pub sync_writes: bool,
    /// Re-hash content on every read and reject mismatches. Strict lookups
    /// always do this.
    #[serde(default)]
    pub verify_reads: bool,
}

fn default_root() -> PathBuf {
    PathBuf::from("./blobs")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            lookup: LookupMode::default(),
            sync_writes: false,
            verify_reads: false,
        }
    }
}

impl StoreConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Load a JSON config file. Missing fields fall back to their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.root, PathBuf::from("./blobs"));
        assert_eq!(config.lookup, LookupMode::Strict);
        assert!(!config.sync_writes);
        assert!(!config.verify_reads);
    }

    #[test]
    fn test_partial_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "root": "/tmp/icons", "lookup": "fingerprint" }}"#).unwrap();

        let config = StoreConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.root, PathBuf::from("/tmp/icons"));
        assert_eq!(config.lookup, LookupMode::Fingerprint);
        assert!(!config.sync_writes);
    }

    #[test]
    fn test_bad_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(StoreConfig::from_json_file(file.path()).is_err());
    }
}
