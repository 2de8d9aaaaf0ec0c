use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use cas_types::{Hash, WrittenBlob};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek};

use crate::error::StoreResult;
use crate::writer::StoreWriter;

/// A seekable, read-only byte stream over a stored blob.
pub trait BlobRead: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin + ?Sized> BlobRead for T {}

/// Boxed stream returned by [`ReadBlobRef::open`].
pub type BlobStream = Box<dyn BlobRead>;

/// Handle on a blob that may or may not exist in a store.
///
/// Building a reference never touches the backend. Existence is only known
/// once `exists`, `size` or `open` is called, and the answer may change
/// between calls if the blob is pruned concurrently.
#[async_trait]
pub trait ReadBlobRef: Send + Sync {
    /// The hash this reference points at.
    fn hash(&self) -> Hash;

    async fn exists(&self) -> StoreResult<bool>;

    /// Size in bytes. Fails with `NoSuchBlob` if the blob is absent.
    async fn size(&self) -> StoreResult<u64>;

    /// Open the blob for reading. Fails with `NoSuchBlob` if the blob is
    /// absent at the time of the call.
    async fn open(&self) -> StoreResult<BlobStream>;

    /// Read the entire blob into memory.
    async fn read_all(&self) -> StoreResult<Vec<u8>> {
        let mut stream = self.open().await?;
        let mut out = Vec::new();
        stream.read_to_end(&mut out).await?;
        Ok(out)
    }
}

/// Identity of a store instance, used to detect copies onto oneself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StoreKey(usize);

impl StoreKey {
    /// Key derived from the shared state behind a store handle. Clones of the
    /// handle share the key.
    pub fn of<T: ?Sized>(inner: &Arc<T>) -> Self {
        Self(Arc::as_ptr(inner) as *const () as usize)
    }
}

/// Read side of a content-addressed store.
pub trait ReadOnlyStore: Send + Sync {
    /// Reference to the blob with the given hash. Never fails.
    fn lookup(&self, hash: Hash) -> Box<dyn ReadBlobRef>;

    /// Opaque namespace tag. Zero for single-realm backends.
    fn realm_id(&self) -> i64 {
        0
    }

    fn store_key(&self) -> StoreKey;

    /// Whether `other` is backed by the very same storage as `self`.
    fn is_same_store(&self, other: &dyn ReadOnlyStore) -> bool {
        self.store_key() == other.store_key()
    }
}

/// Write side of a content-addressed store.
pub trait WriteOnlyStore: Send + Sync {
    /// Begin writing a new blob.
    fn start_writing(&self) -> StoreWriter;
}

/// A store that can both read and write blobs.
pub trait Store: ReadOnlyStore + WriteOnlyStore {}

impl<T: ReadOnlyStore + WriteOnlyStore + ?Sized> Store for T {}

/// Result of asking a backend to persist a blob.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistOutcome {
    /// The blob was not present and has now been stored.
    Written,
    /// A blob with the same hash was already stored; nothing was written.
    AlreadyPresent,
}

/// Bytes whose persistence is deferred until the backend knows the blob is
/// absent.
///
/// Passed by value to [`BlobSink::persist_if_absent`], so it can be written
/// out at most once.
#[derive(Debug, Default)]
pub struct PendingWrite {
    chunks: Vec<Bytes>,
}

impl PendingWrite {
    pub(crate) fn new(chunks: Vec<Bytes>) -> Self {
        Self { chunks }
    }

    /// Total number of deferred bytes.
    pub fn len(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| c.is_empty())
    }

    /// Forward every deferred chunk, in order, to `sink`.
    pub async fn write_into<S>(self, sink: &mut S) -> StoreResult<()>
    where
        S: BlobSink + ?Sized,
    {
        for chunk in self.chunks {
            if !chunk.is_empty() {
                sink.write_chunk(chunk).await?;
            }
        }
        Ok(())
    }

    pub fn into_chunks(self) -> Vec<Bytes> {
        self.chunks
    }
}

/// Backend half of a write session, owned by a [`StoreWriter`].
///
/// The writer feeds chunks in order through `write_chunk`, then calls
/// `persist_if_absent` exactly once with the final hash. Dropping a sink that
/// was never persisted must release its temporaries without storing anything.
#[async_trait]
pub trait BlobSink: Send + 'static {
    /// Persist the next chunk of the blob.
    async fn write_chunk(&mut self, chunk: Bytes) -> StoreResult<()>;

    /// Make the blob visible under `blob.hash`.
    ///
    /// If the hash is already stored, return `AlreadyPresent` and ignore
    /// `pending`. Otherwise write `pending` out first, then publish. Losing a
    /// publication race to another writer of the same hash is
    /// `AlreadyPresent`, not an error.
    async fn persist_if_absent(
        &mut self,
        blob: WrittenBlob,
        pending: PendingWrite,
    ) -> StoreResult<PersistOutcome>;
}
