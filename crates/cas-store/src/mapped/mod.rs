//! Append-only blob log in a fixed-size memory-mapped region.
//!
//! Each record is a [`header::RecordHeader`] followed by the blob bytes. The
//! header is written last, so a record is either fully visible or not at
//! all. Every store instance keeps its own index of the log, filled lazily
//! by scanning forward from the last offset it knows about. Instances
//! created with [`MappedStore::share`] serialize their writes through the
//! region lock and see each other's records on their next scan.

pub mod header;
mod reader;
mod writer;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use cas_types::Hash;
use memmap2::MmapMut;
use tracing::debug;

use crate::config::MappedConfig;
use crate::error::{StoreError, StoreResult};
use crate::traits::{PersistOutcome, ReadBlobRef, ReadOnlyStore, StoreKey, WriteOnlyStore};
use crate::writer::StoreWriter;

use self::header::{align_up, RecordHeader, HEADER_SIZE};
use self::reader::MappedBlobRef;
use self::writer::MappedSink;

/// The mapped memory, shared by every instance created through `share`.
pub(crate) struct Region {
    map: RwLock<MmapMut>,
    path: Option<PathBuf>,
}

impl Region {
    fn capacity(map: &MmapMut) -> u64 {
        map.len() as u64
    }
}

/// Location of a blob's bytes inside the region.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Record {
    pub data_offset: u64,
    pub length: u64,
}

impl Record {
    /// Whether the header in `map` still describes this record for `hash`.
    pub(crate) fn is_live(&self, map: &[u8], hash: &Hash) -> bool {
        RecordHeader::read(map, self.data_offset - HEADER_SIZE).is_some_and(|h| {
            h.hash == *hash && h.data_offset == self.data_offset && h.length == self.length
        })
    }
}

#[derive(Default)]
struct LogIndex {
    blobs: HashMap<Hash, Record>,
    /// Offset of the next record, as far as this instance knows.
    end: u64,
}

impl LogIndex {
    /// Index every valid record past `end`.
    fn catch_up(&mut self, map: &[u8]) {
        while let Some(header) = RecordHeader::read(map, self.end) {
            self.blobs.insert(
                header.hash,
                Record {
                    data_offset: header.data_offset,
                    length: header.length,
                },
            );
            self.end = header.next_offset();
        }
    }

    /// Forget `record` and everything after it. Another instance truncated
    /// the log underneath this one.
    fn rewind_to(&mut self, record: Record) {
        let offset = record.data_offset - HEADER_SIZE;
        self.blobs.retain(|_, r| r.data_offset - HEADER_SIZE < offset);
        self.end = self.end.min(offset);
    }

    /// Look `hash` up, validating index hits and scanning on a miss.
    fn locate(&mut self, map: &[u8], hash: &Hash) -> Option<Record> {
        if let Some(record) = self.blobs.get(hash).copied() {
            if record.is_live(map, hash) {
                return Some(record);
            }
            self.rewind_to(record);
        }
        self.catch_up(map);
        self.blobs.get(hash).copied()
    }
}

pub(crate) struct MappedInner {
    region: Arc<Region>,
    realm: i64,
    index: Mutex<LogIndex>,
}

impl MappedInner {
    fn new(region: Arc<Region>, realm: i64) -> Self {
        Self {
            region,
            realm,
            index: Mutex::new(LogIndex::default()),
        }
    }

    pub(crate) fn region(&self) -> &Arc<Region> {
        &self.region
    }

    pub(crate) fn locate(&self, hash: &Hash) -> Option<Record> {
        let mut index = self.index.lock().expect("lock poisoned");
        let map = self.region.map.read().expect("lock poisoned");
        index.locate(&map, hash)
    }

    /// Append a record unless `hash` is already in the log. Blocking.
    pub(crate) fn append(&self, hash: Hash, chunks: &[bytes::Bytes]) -> StoreResult<PersistOutcome> {
        let mut index = self.index.lock().expect("lock poisoned");
        let mut map = self.region.map.write().expect("lock poisoned");
        if index.locate(&map, &hash).is_some() {
            return Ok(PersistOutcome::AlreadyPresent);
        }

        let length: u64 = chunks.iter().map(|c| c.len() as u64).sum();
        let offset = index.end;
        let header = RecordHeader::at(offset, length, hash);
        let capacity = Region::capacity(&map);
        if header.data_end() > capacity {
            return Err(StoreError::CapacityExceeded {
                needed: header.data_end(),
                capacity,
            });
        }

        let mut cursor = header.data_offset as usize;
        for chunk in chunks {
            map[cursor..cursor + chunk.len()].copy_from_slice(chunk);
            cursor += chunk.len();
        }

        // Stale bytes from before a truncation must not look like a record.
        let next = header.next_offset();
        let sentinel_end = (next + HEADER_SIZE).min(capacity);
        if next < sentinel_end {
            map[next as usize..sentinel_end as usize].fill(0);
        }

        map[offset as usize..header.data_offset as usize].copy_from_slice(&header.encode());
        map.flush_range(offset as usize, (sentinel_end - offset) as usize)?;

        index.end = next;
        index.blobs.insert(
            hash,
            Record {
                data_offset: header.data_offset,
                length,
            },
        );
        debug!(%hash, offset, length, "appended mapped record");
        Ok(PersistOutcome::Written)
    }

    fn truncate(&self, size: u64) -> StoreResult<()> {
        let mut index = self.index.lock().expect("lock poisoned");
        let mut map = self.region.map.write().expect("lock poisoned");
        index.catch_up(&map);
        if size >= index.end {
            return Ok(());
        }

        let mut max = 0;
        index.blobs.retain(|_, r| {
            let end = r.data_offset + r.length;
            let keep = end < size;
            if keep {
                max = max.max(end);
            }
            keep
        });
        let end = align_up(max);
        index.end = end;

        let header_end = (end + HEADER_SIZE).min(Region::capacity(&map));
        if end < header_end {
            map[end as usize..header_end as usize].fill(0);
        }
        map.flush()?;
        debug!(size, end, "truncated mapped log");
        Ok(())
    }
}

/// Content-addressed store over a memory-mapped append log.
///
/// Capacity is fixed at creation; a commit that does not fit fails with
/// [`StoreError::CapacityExceeded`].
pub struct MappedStore {
    inner: Arc<MappedInner>,
}

impl MappedStore {
    /// Map the file at `path`, growing it to `capacity` bytes if it is
    /// smaller. Records already in the file are picked up lazily.
    pub fn open(path: impl AsRef<Path>, capacity: u64) -> StoreResult<Self> {
        let path = path.as_ref();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() < capacity {
            file.set_len(capacity)?;
        }
        if file.metadata()?.len() < HEADER_SIZE {
            return Err(StoreError::Config(format!(
                "mapped store capacity must be at least {HEADER_SIZE} bytes"
            )));
        }
        // SAFETY: the file stays mapped for the lifetime of the region. Every
        // access through this process goes through the region lock; other
        // processes must not resize the file while it is mapped.
        let map = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = %path.display(), capacity = map.len(), "opened mapped store");
        Ok(Self::from_region(Region {
            map: RwLock::new(map),
            path: Some(path.to_path_buf()),
        }))
    }

    pub fn with_config(config: &MappedConfig) -> StoreResult<Self> {
        Self::open(&config.path, config.capacity)
    }

    /// A store over anonymous memory, gone when the last instance drops.
    pub fn anonymous(capacity: u64) -> StoreResult<Self> {
        if capacity < HEADER_SIZE {
            return Err(StoreError::Config(format!(
                "mapped store capacity must be at least {HEADER_SIZE} bytes"
            )));
        }
        let len = usize::try_from(capacity)
            .map_err(|_| StoreError::Config(format!("capacity {capacity} too large")))?;
        let map = MmapMut::map_anon(len)?;
        Ok(Self::from_region(Region {
            map: RwLock::new(map),
            path: None,
        }))
    }

    fn from_region(region: Region) -> Self {
        Self {
            inner: Arc::new(MappedInner::new(Arc::new(region), 0)),
        }
    }

    /// Another store instance over the same region, with its own index.
    pub fn share(&self) -> Self {
        Self {
            inner: Arc::new(MappedInner::new(
                Arc::clone(&self.inner.region),
                self.inner.realm,
            )),
        }
    }

    /// Offset where the next record will be written. Scans for records
    /// appended by other instances first.
    pub fn size(&self) -> u64 {
        let mut index = self.inner.index.lock().expect("lock poisoned");
        let map = self.inner.region.map.read().expect("lock poisoned");
        index.catch_up(&map);
        index.end
    }

    pub fn capacity(&self) -> u64 {
        Region::capacity(&self.inner.region.map.read().expect("lock poisoned"))
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.region.path.as_deref()
    }

    /// Drop every record that ends at or after `size`. A `size` at or past
    /// the current end leaves the log untouched.
    ///
    /// The log end moves back to the aligned end of the last surviving
    /// record. Readers holding a dropped record see `NotFound` on their
    /// next read.
    pub fn truncate(&self, size: u64) -> StoreResult<()> {
        self.inner.truncate(size)
    }
}

impl ReadOnlyStore for MappedStore {
    fn lookup(&self, hash: Hash) -> Box<dyn ReadBlobRef> {
        Box::new(MappedBlobRef::new(Arc::clone(&self.inner), hash))
    }

    fn realm_id(&self) -> i64 {
        self.inner.realm
    }

    fn store_key(&self) -> StoreKey {
        StoreKey::of(&self.inner)
    }
}

impl WriteOnlyStore for MappedStore {
    fn start_writing(&self) -> StoreWriter {
        StoreWriter::new(MappedSink::new(Arc::clone(&self.inner)))
    }
}

impl std::fmt::Debug for MappedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedStore")
            .field("path", &self.inner.region.path)
            .field("capacity", &self.capacity())
            .finish()
    }
}
