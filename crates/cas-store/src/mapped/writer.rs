use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cas_types::WrittenBlob;
use tracing::debug;

use super::MappedInner;
use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobSink, PendingWrite, PersistOutcome};

/// Holds chunks in memory until commit, then appends them as one record.
pub(crate) struct MappedSink {
    store: Arc<MappedInner>,
    chunks: Vec<Bytes>,
}

impl MappedSink {
    pub(crate) fn new(store: Arc<MappedInner>) -> Self {
        Self {
            store,
            chunks: Vec::new(),
        }
    }
}

#[async_trait]
impl BlobSink for MappedSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.chunks.push(chunk);
        Ok(())
    }

    async fn persist_if_absent(
        &mut self,
        blob: WrittenBlob,
        pending: PendingWrite,
    ) -> StoreResult<PersistOutcome> {
        if self.store.locate(&blob.hash).is_some() {
            debug!(hash = %blob.hash, "mapped blob already present");
            self.chunks.clear();
            return Ok(PersistOutcome::AlreadyPresent);
        }

        let mut chunks = std::mem::take(&mut self.chunks);
        chunks.extend(pending.into_chunks());
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.append(blob.hash, &chunks))
            .await
            .map_err(StoreError::from_join)?
    }
}
