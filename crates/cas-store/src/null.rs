use async_trait::async_trait;
use bytes::Bytes;
use cas_types::WrittenBlob;

use crate::error::StoreResult;
use crate::traits::{BlobSink, PendingWrite, PersistOutcome, WriteOnlyStore};
use crate::writer::StoreWriter;

/// A write-only store that hashes everything and keeps nothing.
///
/// Useful for computing the hash and size a blob would have.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStore;

impl WriteOnlyStore for NullStore {
    fn start_writing(&self) -> StoreWriter {
        StoreWriter::new(NullSink)
    }
}

struct NullSink;

#[async_trait]
impl BlobSink for NullSink {
    async fn write_chunk(&mut self, _chunk: Bytes) -> StoreResult<()> {
        Ok(())
    }

    async fn persist_if_absent(
        &mut self,
        _blob: WrittenBlob,
        _pending: PendingWrite,
    ) -> StoreResult<PersistOutcome> {
        Ok(PersistOutcome::Written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_file, ChunkedReader};

    #[tokio::test]
    async fn computes_hash_without_storing() {
        let mut writer = NullStore.start_writing();
        writer
            .write_from(ChunkedReader::new(fake_file(1024), 100), None)
            .await
            .unwrap();
        let blob = writer.commit().await.unwrap();
        assert_eq!(blob.hash.to_string(), "B2EA9F7FCEA831A4A63B213F41A8855B");
        assert_eq!(blob.size, 1024);
    }
}
