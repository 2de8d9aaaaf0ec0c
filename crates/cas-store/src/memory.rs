use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use cas_types::{Hash, WrittenBlob};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{
    BlobSink, BlobStream, PendingWrite, PersistOutcome, ReadBlobRef, ReadOnlyStore, StoreKey,
    WriteOnlyStore,
};
use crate::writer::StoreWriter;

type BlobMap = Arc<RwLock<HashMap<Hash, Bytes>>>;

/// In-memory, HashMap-based blob store.
///
/// Intended for tests and embedding. Clones share the same map. Blob bytes
/// are reference-counted, so reads never copy.
#[derive(Clone, Default)]
pub struct MemoryStore {
    blobs: BlobMap,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.blobs.read().expect("lock poisoned").is_empty()
    }

    /// Total bytes across all stored blobs.
    pub fn total_bytes(&self) -> u64 {
        self.blobs
            .read()
            .expect("lock poisoned")
            .values()
            .map(|b| b.len() as u64)
            .sum()
    }

    /// Remove a blob. Returns whether it was present.
    pub fn remove(&self, hash: &Hash) -> bool {
        self.blobs
            .write()
            .expect("lock poisoned")
            .remove(hash)
            .is_some()
    }

    /// Sorted list of every stored hash.
    pub fn hashes(&self) -> Vec<Hash> {
        let map = self.blobs.read().expect("lock poisoned");
        let mut hashes: Vec<Hash> = map.keys().copied().collect();
        hashes.sort();
        hashes
    }

    fn get(&self, hash: &Hash) -> Option<Bytes> {
        self.blobs.read().expect("lock poisoned").get(hash).cloned()
    }
}

impl ReadOnlyStore for MemoryStore {
    fn lookup(&self, hash: Hash) -> Box<dyn ReadBlobRef> {
        Box::new(MemoryBlobRef {
            hash,
            store: self.clone(),
        })
    }

    fn store_key(&self) -> StoreKey {
        StoreKey::of(&self.blobs)
    }
}

impl WriteOnlyStore for MemoryStore {
    fn start_writing(&self) -> StoreWriter {
        StoreWriter::new(MemorySink {
            blobs: Arc::clone(&self.blobs),
            data: BytesMut::new(),
        })
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("blob_count", &self.len())
            .finish()
    }
}

struct MemorySink {
    blobs: BlobMap,
    data: BytesMut,
}

#[async_trait]
impl BlobSink for MemorySink {
    async fn write_chunk(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.data.extend_from_slice(&chunk);
        Ok(())
    }

    async fn persist_if_absent(
        &mut self,
        blob: WrittenBlob,
        pending: PendingWrite,
    ) -> StoreResult<PersistOutcome> {
        if self
            .blobs
            .read()
            .expect("lock poisoned")
            .contains_key(&blob.hash)
        {
            debug!(hash = %blob.hash, "memory blob already present");
            return Ok(PersistOutcome::AlreadyPresent);
        }
        for chunk in pending.into_chunks() {
            self.data.extend_from_slice(&chunk);
        }
        let data = std::mem::take(&mut self.data).freeze();

        let mut map = self.blobs.write().expect("lock poisoned");
        let mut outcome = PersistOutcome::AlreadyPresent;
        map.entry(blob.hash).or_insert_with(|| {
            outcome = PersistOutcome::Written;
            data
        });
        Ok(outcome)
    }
}

struct MemoryBlobRef {
    hash: Hash,
    store: MemoryStore,
}

impl MemoryBlobRef {
    fn data(&self) -> StoreResult<Bytes> {
        self.store
            .get(&self.hash)
            .ok_or_else(|| StoreError::no_such_blob_in(self.hash, "memory"))
    }
}

#[async_trait]
impl ReadBlobRef for MemoryBlobRef {
    fn hash(&self) -> Hash {
        self.hash
    }

    async fn exists(&self) -> StoreResult<bool> {
        Ok(self.store.get(&self.hash).is_some())
    }

    async fn size(&self) -> StoreResult<u64> {
        Ok(self.data()?.len() as u64)
    }

    async fn open(&self) -> StoreResult<BlobStream> {
        Ok(Box::new(Cursor::new(self.data()?)))
    }

    async fn read_all(&self) -> StoreResult<Vec<u8>> {
        Ok(self.data()?.to_vec())
    }
}
