use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cas_types::WrittenBlob;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{paths, DiskInner};
use crate::error::StoreResult;
use crate::traits::{BlobSink, PendingWrite, PersistOutcome};

/// Streams a blob into a temp file, then renames it into place.
pub(crate) struct DiskSink {
    store: Arc<DiskInner>,
    temp_path: PathBuf,
    file: Option<File>,
    /// Whether `temp_path` may exist on disk and needs cleaning up.
    temp_created: bool,
}

impl DiskSink {
    pub(crate) fn new(store: Arc<DiskInner>) -> Self {
        let temp_path = paths::new_temp_path(&store.root);
        Self {
            store,
            temp_path,
            file: None,
            temp_created: false,
        }
    }

    async fn file(&mut self) -> StoreResult<&mut File> {
        let file = match self.file.take() {
            Some(file) => file,
            None => {
                self.temp_created = true;
                OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&self.temp_path)
                    .await?
            }
        };
        Ok(self.file.insert(file))
    }

    /// Flush and close the temp file, creating it if nothing was written.
    async fn close(&mut self) -> StoreResult<()> {
        let sync = self.store.sync_on_commit;
        let file = self.file().await?;
        file.flush().await?;
        if sync {
            file.sync_all().await?;
        }
        self.file = None;
        Ok(())
    }

    async fn discard(&mut self) {
        self.file = None;
        if !self.temp_created {
            return;
        }
        match fs::remove_file(&self.temp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.temp_path.display(), error = %e, "failed to remove temp file"),
        }
        self.temp_created = false;
    }
}

#[async_trait]
impl BlobSink for DiskSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.file().await?.write_all(&chunk).await?;
        Ok(())
    }

    async fn persist_if_absent(
        &mut self,
        blob: WrittenBlob,
        pending: PendingWrite,
    ) -> StoreResult<PersistOutcome> {
        let target = paths::blob_path(&self.store.root, &blob.hash);
        if fs::try_exists(&target).await? {
            debug!(hash = %blob.hash, "disk blob already present");
            self.discard().await;
            return Ok(PersistOutcome::AlreadyPresent);
        }

        pending.write_into(self).await?;
        self.close().await?;
        fs::create_dir_all(paths::shard_dir(&self.store.root, &blob.hash)).await?;

        match fs::rename(&self.temp_path, &target).await {
            Ok(()) => {
                self.temp_created = false;
                Ok(PersistOutcome::Written)
            }
            Err(e) => {
                if fs::try_exists(&target).await.unwrap_or(false) {
                    debug!(hash = %blob.hash, "lost rename race");
                    self.discard().await;
                    Ok(PersistOutcome::AlreadyPresent)
                } else {
                    Err(e.into())
                }
            }
        }
    }
}

impl Drop for DiskSink {
    fn drop(&mut self) {
        self.file = None;
        if !self.temp_created {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.temp_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.temp_path.display(), error = %e, "failed to remove temp file");
            }
        }
    }
}
