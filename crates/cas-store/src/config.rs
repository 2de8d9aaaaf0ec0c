use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::factory::{DiskStoreFactory, MappedStoreFactory, MemoryStoreFactory, StoreFactory};
use crate::mapped::MappedStore;

/// Default capacity of a memory-mapped store: 64 MiB.
pub const DEFAULT_MAPPED_CAPACITY: u64 = 64 * 1024 * 1024;

/// Which backend to use, and how to set it up.
///
/// Read from TOML with a `backend` key selecting the variant:
///
/// ```toml
/// backend = "disk"
/// root = "/var/lib/cas"
/// sync_on_commit = true
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    Disk(DiskConfig),
    MemoryMapped(MappedConfig),
    /// Not persisted; useful for tests and dry runs.
    Memory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Disk(DiskConfig::default())
    }
}

impl StoreConfig {
    pub fn from_toml_str(s: &str) -> StoreResult<Self> {
        toml::from_str(s).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Read a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> StoreResult<String> {
        toml::to_string(self).map_err(|e| StoreError::Config(e.to_string()))
    }

    /// Build the factory this configuration describes. Opens mapped files
    /// eagerly; disk account directories are created on first use.
    pub fn build_factory(&self) -> StoreResult<Arc<dyn StoreFactory>> {
        let factory: Arc<dyn StoreFactory> = match self {
            Self::Disk(disk) => Arc::new(DiskStoreFactory::new(disk.clone())),
            Self::MemoryMapped(mapped) => {
                Arc::new(MappedStoreFactory::new(MappedStore::with_config(mapped)?))
            }
            Self::Memory => Arc::new(MemoryStoreFactory::new()),
        };
        Ok(factory)
    }
}

/// Settings for the file-per-blob backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Store root. Factories put each account in a subdirectory.
    pub root: PathBuf,
    /// `fsync` blob data before publishing it.
    #[serde(default)]
    pub sync_on_commit: bool,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("cas-data"),
            sync_on_commit: false,
        }
    }
}

/// Settings for the memory-mapped backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappedConfig {
    pub path: PathBuf,
    /// Size of the mapped file in bytes.
    #[serde(default = "default_capacity")]
    pub capacity: u64,
}

fn default_capacity() -> u64 {
    DEFAULT_MAPPED_CAPACITY
}

impl Default for MappedConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cas.map"),
            capacity: DEFAULT_MAPPED_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        let StoreConfig::Disk(disk) = c else {
            panic!("default should be disk");
        };
        assert_eq!(disk.root, PathBuf::from("cas-data"));
        assert!(!disk.sync_on_commit);
    }

    #[test]
    fn parse_disk() {
        let c = StoreConfig::from_toml_str(
            r#"
            backend = "disk"
            root = "/var/lib/cas"
            sync_on_commit = true
            "#,
        )
        .unwrap();
        assert_eq!(
            c,
            StoreConfig::Disk(DiskConfig {
                root: "/var/lib/cas".into(),
                sync_on_commit: true,
            })
        );
    }

    #[test]
    fn parse_mapped_with_default_capacity() {
        let c = StoreConfig::from_toml_str(
            r#"
            backend = "memory_mapped"
            path = "blobs.map"
            "#,
        )
        .unwrap();
        assert_eq!(
            c,
            StoreConfig::MemoryMapped(MappedConfig {
                path: "blobs.map".into(),
                capacity: DEFAULT_MAPPED_CAPACITY,
            })
        );
    }

    #[test]
    fn parse_memory() {
        let c = StoreConfig::from_toml_str(r#"backend = "memory""#).unwrap();
        assert_eq!(c, StoreConfig::Memory);
    }

    #[test]
    fn unknown_backend_is_config_error() {
        let err = StoreConfig::from_toml_str(r#"backend = "tape""#).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn toml_roundtrip() {
        let c = StoreConfig::MemoryMapped(MappedConfig {
            path: "x.map".into(),
            capacity: 4096,
        });
        let text = c.to_toml_string().unwrap();
        assert!(text.contains("backend = \"memory_mapped\""));
        assert_eq!(StoreConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cas.toml");
        std::fs::write(&path, "backend = \"memory\"\n").unwrap();
        assert_eq!(StoreConfig::load(&path).unwrap(), StoreConfig::Memory);
        assert!(matches!(
            StoreConfig::load(dir.path().join("missing.toml")),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn build_factory_per_backend() {
        let dir = tempfile::tempdir().unwrap();
        let disk = StoreConfig::Disk(DiskConfig {
            root: dir.path().to_path_buf(),
            sync_on_commit: false,
        });
        assert!(disk.build_factory().unwrap().describe().starts_with("[CAS] "));

        let mapped = StoreConfig::MemoryMapped(MappedConfig {
            path: dir.path().join("blobs.map"),
            capacity: 4096,
        });
        assert_eq!(
            mapped.build_factory().unwrap().describe(),
            "[CAS] memory-mapped file"
        );

        assert!(StoreConfig::Memory
            .build_factory()
            .unwrap()
            .describe()
            .starts_with("[CAS] memory "));
    }
}
