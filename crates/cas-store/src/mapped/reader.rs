use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use cas_types::Hash;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use super::{MappedInner, Record, Region};
use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobStream, ReadBlobRef};

pub(crate) struct MappedBlobRef {
    hash: Hash,
    store: Arc<MappedInner>,
}

impl MappedBlobRef {
    pub(crate) fn new(store: Arc<MappedInner>, hash: Hash) -> Self {
        Self { hash, store }
    }

    fn record(&self) -> StoreResult<Record> {
        self.store
            .locate(&self.hash)
            .ok_or_else(|| StoreError::no_such_blob_in(self.hash, self.store.realm.to_string()))
    }
}

#[async_trait]
impl ReadBlobRef for MappedBlobRef {
    fn hash(&self) -> Hash {
        self.hash
    }

    async fn exists(&self) -> StoreResult<bool> {
        Ok(self.store.locate(&self.hash).is_some())
    }

    async fn size(&self) -> StoreResult<u64> {
        Ok(self.record()?.length)
    }

    async fn open(&self) -> StoreResult<BlobStream> {
        let record = self.record()?;
        Ok(Box::new(MappedReader {
            region: Arc::clone(self.store.region()),
            hash: self.hash,
            record,
            position: 0,
            seek_to: None,
        }))
    }
}

/// Seekable reader over one record.
///
/// Every read re-checks the record header, so a record dropped by a
/// truncation yields `NotFound` instead of whatever was written over it.
pub(crate) struct MappedReader {
    region: Arc<Region>,
    hash: Hash,
    record: Record,
    position: u64,
    seek_to: Option<u64>,
}

impl AsyncRead for MappedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let map = this
            .region
            .map
            .read()
            .map_err(|_| io::Error::other("lock poisoned"))?;
        if !this.record.is_live(&map, &this.hash) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("blob {} was truncated away", this.hash),
            )));
        }

        let remaining = this.record.length.saturating_sub(this.position);
        let n = remaining.min(buf.remaining() as u64) as usize;
        if n > 0 {
            let start = (this.record.data_offset + this.position) as usize;
            buf.put_slice(&map[start..start + n]);
            this.position += n as u64;
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for MappedReader {
    fn start_seek(mut self: Pin<&mut Self>, pos: SeekFrom) -> io::Result<()> {
        let (base, delta) = match pos {
            SeekFrom::Start(n) => {
                self.seek_to = Some(n);
                return Ok(());
            }
            SeekFrom::End(d) => (self.record.length, d),
            SeekFrom::Current(d) => (self.position, d),
        };
        let target = base.checked_add_signed(delta).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )
        })?;
        self.seek_to = Some(target);
        Ok(())
    }

    fn poll_complete(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        if let Some(target) = self.seek_to.take() {
            self.position = target;
        }
        Poll::Ready(Ok(self.position))
    }
}
