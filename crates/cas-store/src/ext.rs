//! One-call helpers over [`WriteOnlyStore`] and [`ReadOnlyStore`].

use bytes::Bytes;
use cas_types::{Hash, WrittenBlob};
use tokio::io::AsyncRead;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ReadBlobRef, ReadOnlyStore, WriteOnlyStore};

/// Store a whole in-memory buffer.
pub async fn write_bytes<S>(store: &S, data: impl Into<Bytes>) -> StoreResult<WrittenBlob>
where
    S: WriteOnlyStore + ?Sized,
{
    store.start_writing().write_and_commit(data).await
}

/// Store everything `reader` yields until end of data.
pub async fn write_stream<S, R>(store: &S, reader: R) -> StoreResult<WrittenBlob>
where
    S: WriteOnlyStore + ?Sized,
    R: AsyncRead + Unpin + Send,
{
    let mut writer = store.start_writing();
    writer.write_from(reader, None).await?;
    writer.commit().await
}

/// Copy the blobs named by `hashes` from `source` into `dest`.
///
/// Every blob is checked for existence before anything is copied, so a
/// missing blob fails the import up front with `NoSuchBlob`. Each copy is
/// re-hashed on the way in; a copy whose hash differs from the one it was
/// requested under fails with `HashMismatch`.
pub async fn import_blobs<D, S>(
    dest: &D,
    source: &S,
    hashes: &[Hash],
) -> StoreResult<Vec<WrittenBlob>>
where
    D: WriteOnlyStore + ?Sized,
    S: ReadOnlyStore + ?Sized,
{
    for hash in hashes {
        if !source.lookup(*hash).exists().await? {
            return Err(StoreError::no_such_blob_in(
                *hash,
                source.realm_id().to_string(),
            ));
        }
    }

    let mut written = Vec::with_capacity(hashes.len());
    for hash in hashes {
        let stream = source.lookup(*hash).open().await?;
        let mut writer = dest.start_writing();
        writer.write_from(stream, None).await?;
        let blob = writer.commit().await?;
        if blob.hash != *hash {
            return Err(StoreError::HashMismatch {
                expected: *hash,
                actual: blob.hash,
            });
        }
        written.push(blob);
    }
    debug!(count = written.len(), "imported blobs");
    Ok(written)
}
