//! Durable backend storing one file per blob.
//!
//! Writers stream into a private temp file under `<root>/tmp/` and publish it
//! with an atomic rename into `<root>/_XY/<rest of hex>`. A blob file is
//! therefore either absent or complete. Concurrent writers of the same
//! content race on the rename; the loser discards its temp file.

mod blob_ref;
pub mod paths;
mod writer;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cas_types::Hash;
use tracing::debug;

use crate::config::DiskConfig;
use crate::error::StoreResult;
use crate::traits::{ReadBlobRef, ReadOnlyStore, StoreKey, WriteOnlyStore};
use crate::writer::StoreWriter;

use self::blob_ref::DiskBlobRef;
use self::writer::DiskSink;

pub(crate) struct DiskInner {
    root: PathBuf,
    sync_on_commit: bool,
    realm: i64,
}

/// File-per-blob store rooted at a directory.
///
/// Cheap to clone; clones share the same identity.
#[derive(Clone)]
pub struct DiskStore {
    inner: Arc<DiskInner>,
}

impl DiskStore {
    /// Open a store at `root`, creating the directory layout if needed.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        Self::with_config(&DiskConfig {
            root: root.as_ref().to_path_buf(),
            ..DiskConfig::default()
        })
    }

    pub fn with_config(config: &DiskConfig) -> StoreResult<Self> {
        std::fs::create_dir_all(paths::temp_dir(&config.root))?;
        debug!(root = %config.root.display(), "opened disk store");
        Ok(Self {
            inner: Arc::new(DiskInner {
                root: config.root.clone(),
                sync_on_commit: config.sync_on_commit,
                realm: 0,
            }),
        })
    }

    /// Tag this store with an account id reported by `realm_id`.
    pub fn with_realm(self, realm: i64) -> Self {
        Self {
            inner: Arc::new(DiskInner {
                root: self.inner.root.clone(),
                sync_on_commit: self.inner.sync_on_commit,
                realm,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Where the blob with `hash` lives once committed.
    pub fn path_of(&self, hash: &Hash) -> PathBuf {
        paths::blob_path(&self.inner.root, hash)
    }

    /// Remove a blob. Removing an absent blob is a no-op, and concurrent
    /// deletes of the same blob never fail.
    ///
    /// The shard directory is removed too if this left it empty.
    pub async fn delete(&self, hash: &Hash) -> StoreResult<()> {
        match tokio::fs::remove_file(self.path_of(hash)).await {
            Ok(()) => debug!(%hash, "deleted disk blob"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let shard = paths::shard_dir(&self.inner.root, hash);
        match tokio::fs::remove_dir(&shard).await {
            Ok(()) => debug!(shard = %shard.display(), "removed empty shard"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            // Usually other blobs still live in the shard.
            Err(e) => debug!(shard = %shard.display(), error = %e, "kept shard directory"),
        }
        Ok(())
    }
}

impl ReadOnlyStore for DiskStore {
    fn lookup(&self, hash: Hash) -> Box<dyn ReadBlobRef> {
        Box::new(DiskBlobRef::new(&self.inner, hash))
    }

    fn realm_id(&self) -> i64 {
        self.inner.realm
    }

    fn store_key(&self) -> StoreKey {
        StoreKey::of(&self.inner)
    }
}

impl WriteOnlyStore for DiskStore {
    fn start_writing(&self) -> StoreWriter {
        StoreWriter::new(DiskSink::new(Arc::clone(&self.inner)))
    }
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStore")
            .field("root", &self.inner.root)
            .field("realm", &self.inner.realm)
            .finish()
    }
}
