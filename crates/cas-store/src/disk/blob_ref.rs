use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use cas_types::Hash;
use tokio::fs::{self, File};
use tracing::trace;

use super::{paths, DiskInner};
use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobStream, ReadBlobRef};

pub(crate) struct DiskBlobRef {
    hash: Hash,
    path: PathBuf,
}

impl DiskBlobRef {
    pub(crate) fn new(store: &DiskInner, hash: Hash) -> Self {
        Self {
            hash,
            path: paths::blob_path(&store.root, &hash),
        }
    }

    fn missing_or(&self, err: std::io::Error) -> StoreError {
        if err.kind() == ErrorKind::NotFound {
            StoreError::no_such_blob_in(self.hash, self.path.display().to_string())
        } else {
            err.into()
        }
    }
}

#[async_trait]
impl ReadBlobRef for DiskBlobRef {
    fn hash(&self) -> Hash {
        self.hash
    }

    async fn exists(&self) -> StoreResult<bool> {
        Ok(fs::try_exists(&self.path).await?)
    }

    async fn size(&self) -> StoreResult<u64> {
        let meta = fs::metadata(&self.path)
            .await
            .map_err(|e| self.missing_or(e))?;
        Ok(meta.len())
    }

    async fn open(&self) -> StoreResult<BlobStream> {
        let file = File::open(&self.path)
            .await
            .map_err(|e| self.missing_or(e))?;
        trace!(hash = %self.hash, path = %self.path.display(), "opened disk blob");
        Ok(Box::new(file))
    }
}
