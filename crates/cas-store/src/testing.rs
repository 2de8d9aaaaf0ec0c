//! Shared fixtures for backend tests.

use std::collections::HashSet;
use std::io::SeekFrom;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use cas_types::{Hash, WrittenBlob};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, ReadBuf};

use crate::error::{StoreError, StoreResult};
use crate::traits::{
    BlobSink, PendingWrite, PersistOutcome, ReadBlobRef, ReadOnlyStore, Store, WriteOnlyStore,
};

pub(crate) const SMALL_HASH: &str = "B2EA9F7FCEA831A4A63B213F41A8855B";
pub(crate) const LARGE_HASH: &str = "2A43A3F3D5B1A13F0B4C3369040D0919";

/// `n` bytes where byte `i` is `i mod 256`.
pub(crate) fn fake_file(n: usize) -> Vec<u8> {
    (0..n).map(|i| i as u8).collect()
}

#[derive(Default)]
struct Recorded {
    bytes: Vec<u8>,
    persisted: Vec<Hash>,
    present: HashSet<Hash>,
    persist_calls: usize,
    deferred_bytes: u64,
    fail_persist: bool,
    fail_writes: bool,
    stall_persist: bool,
}

/// A sink that keeps everything in memory and lets tests inject failures.
#[derive(Clone, Default)]
pub(crate) struct RecordingSink {
    state: Arc<Mutex<Recorded>>,
}

impl RecordingSink {
    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        f(&mut self.state.lock().expect("lock poisoned"))
    }

    pub(crate) fn bytes(&self) -> Vec<u8> {
        self.with(|r| r.bytes.clone())
    }

    pub(crate) fn persisted(&self) -> Vec<Hash> {
        self.with(|r| r.persisted.clone())
    }

    pub(crate) fn persist_calls(&self) -> usize {
        self.with(|r| r.persist_calls)
    }

    pub(crate) fn deferred_bytes(&self) -> u64 {
        self.with(|r| r.deferred_bytes)
    }

    pub(crate) fn mark_present(&self, hash: Hash) {
        self.with(|r| r.present.insert(hash));
    }

    pub(crate) fn fail_persist(&self) {
        self.with(|r| r.fail_persist = true);
    }

    pub(crate) fn fail_writes(&self) {
        self.with(|r| r.fail_writes = true);
    }

    pub(crate) fn stall_persist(&self) {
        self.with(|r| r.stall_persist = true);
    }
}

#[async_trait]
impl BlobSink for RecordingSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.with(|r| {
            if r.fail_writes {
                return Err(StoreError::Io(std::io::Error::other("injected write failure")));
            }
            r.bytes.extend_from_slice(&chunk);
            Ok(())
        })
    }

    async fn persist_if_absent(
        &mut self,
        blob: WrittenBlob,
        pending: PendingWrite,
    ) -> StoreResult<PersistOutcome> {
        let (stall, fail, present) = self.with(|r| {
            r.persist_calls += 1;
            (r.stall_persist, r.fail_persist, r.present.contains(&blob.hash))
        });
        if stall {
            std::future::pending::<()>().await;
        }
        if fail {
            return Err(StoreError::Io(std::io::Error::other("injected persist failure")));
        }
        if present {
            return Ok(PersistOutcome::AlreadyPresent);
        }
        let deferred = pending.len();
        pending.write_into(self).await?;
        self.with(|r| {
            r.deferred_bytes += deferred;
            r.persisted.push(blob.hash);
            r.present.insert(blob.hash);
        });
        Ok(PersistOutcome::Written)
    }
}

/// Reader that returns at most `step` bytes per call.
#[derive(Clone)]
pub(crate) struct ChunkedReader {
    data: Arc<Vec<u8>>,
    pos: usize,
    step: usize,
    returned_eof: bool,
    reads_after_eof: Arc<AtomicUsize>,
}

impl ChunkedReader {
    pub(crate) fn new(data: Vec<u8>, step: usize) -> Self {
        Self {
            data: Arc::new(data),
            pos: 0,
            step,
            returned_eof: false,
            reads_after_eof: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Calls made after end of data was already reported.
    pub(crate) fn reads_after_eof(&self) -> usize {
        self.reads_after_eof.load(Ordering::SeqCst)
    }
}

impl AsyncRead for ChunkedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let remaining = self.data.len() - self.pos;
        if remaining == 0 {
            if self.returned_eof {
                self.reads_after_eof.fetch_add(1, Ordering::SeqCst);
            }
            self.returned_eof = true;
            return Poll::Ready(Ok(()));
        }
        let n = remaining.min(self.step).min(buf.remaining());
        let start = self.pos;
        buf.put_slice(&self.data[start..start + n]);
        self.pos += n;
        Poll::Ready(Ok(()))
    }
}

// ---------------------------------------------------------------------------
// Behaviour every backend must share
// ---------------------------------------------------------------------------

async fn write_bytes(store: &dyn Store, data: &[u8]) -> WrittenBlob {
    let mut writer = store.start_writing();
    writer.write_and_commit(data.to_vec()).await.unwrap()
}

async fn assert_readable(store: &dyn Store, hash: Hash, expected: &[u8]) {
    let blob = store.lookup(hash);
    assert_eq!(blob.hash(), hash);
    assert!(blob.exists().await.unwrap());
    assert_eq!(blob.size().await.unwrap(), expected.len() as u64);
    assert_eq!(blob.read_all().await.unwrap(), expected);
}

pub(crate) async fn check_empty_blob(store: &dyn Store) {
    let blob = write_bytes(store, &[]).await;
    assert_eq!(blob.hash, Hash::EMPTY);
    assert_eq!(blob.size, 0);

    let reference = store.lookup(Hash::parse("D41D8CD98F00B204E9800998ECF8427E").unwrap());
    assert!(reference.exists().await.unwrap());
    assert_eq!(reference.size().await.unwrap(), 0);
    let mut stream = reference.open().await.unwrap();
    let mut buf = [0u8; 10];
    assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
}

pub(crate) async fn check_small_file(store: &dyn Store) {
    let file = fake_file(1024);
    let blob = write_bytes(store, &file).await;
    assert_eq!(blob.hash.to_string(), SMALL_HASH);
    assert_eq!(blob.size, 1024);
    assert_readable(store, blob.hash, &file).await;

    let mut stream = store.lookup(blob.hash).open().await.unwrap();
    let mut head = [0u8; 10];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

pub(crate) async fn check_small_file_split(store: &dyn Store) {
    let file = fake_file(1024);
    let mut writer = store.start_writing();
    for chunk in file.chunks(256) {
        writer.write_async(chunk.to_vec()).await.unwrap();
    }
    let blob = writer.commit().await.unwrap();
    assert_eq!(blob.hash.to_string(), SMALL_HASH);
    assert_readable(store, blob.hash, &file).await;
}

pub(crate) async fn check_end_of_stream(store: &dyn Store) {
    let file = fake_file(1024);
    let reader = ChunkedReader::new(file.clone(), 17);
    let probe = reader.clone();
    let mut writer = store.start_writing();
    writer.write_from(reader, None).await.unwrap();
    let blob = writer.commit().await.unwrap();
    assert_eq!(probe.reads_after_eof(), 0);
    assert_eq!(blob.hash.to_string(), SMALL_HASH);
    assert_readable(store, blob.hash, &file).await;
}

pub(crate) async fn check_large_file(store: &dyn Store) {
    let file = fake_file(9 * 1024 * 1024);
    let mut writer = store.start_writing();
    for chunk in file.chunks(64 * 1024) {
        writer.write(chunk).unwrap();
    }
    let blob = writer.commit().await.unwrap();
    assert_eq!(blob.hash.to_string(), LARGE_HASH);
    assert_eq!(blob.size, file.len() as u64);

    let reference = store.lookup(blob.hash);
    let data = reference.read_all().await.unwrap();
    assert_eq!(Hash::of(&data), blob.hash);
    assert_eq!(&data[..10], &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
}

pub(crate) async fn check_seek(store: &dyn Store) {
    let file = fake_file(1024);
    let blob = write_bytes(store, &file).await;
    let mut stream = store.lookup(blob.hash).open().await.unwrap();

    stream.seek(SeekFrom::Start(1000)).await.unwrap();
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert_eq!(rest, &file[1000..]);

    let pos = stream.seek(SeekFrom::End(-4)).await.unwrap();
    assert_eq!(pos, 1020);
    let pos = stream.seek(SeekFrom::Current(-2)).await.unwrap();
    assert_eq!(pos, 1018);
    let mut two = [0u8; 2];
    stream.read_exact(&mut two).await.unwrap();
    assert_eq!(two, [file[1018], file[1019]]);
}

pub(crate) async fn check_dedup(store: &dyn Store) {
    let first = write_bytes(store, b"same bytes").await;

    let mut writer = store.start_writing();
    writer.write(b"same ").unwrap();
    writer.write_async(b"bytes".to_vec()).await.unwrap();
    let second = writer.commit().await.unwrap();

    assert_eq!(first, second);
    assert_eq!(writer.outcome(), Some(PersistOutcome::AlreadyPresent));
    assert_readable(store, first.hash, b"same bytes").await;
}

pub(crate) async fn check_missing(store: &dyn Store) {
    let hash = Hash::of(b"never written");
    let reference = store.lookup(hash);
    assert!(!reference.exists().await.unwrap());
    assert!(reference.size().await.unwrap_err().is_not_found());
    assert!(reference.open().await.err().unwrap().is_not_found());
}

pub(crate) async fn check_uncommitted_writer_leaves_nothing(store: &dyn Store) {
    let mut writer = store.start_writing();
    writer.write_async(b"abandoned".to_vec()).await.unwrap();
    drop(writer);
    assert!(!store.lookup(Hash::of(b"abandoned")).exists().await.unwrap());
}

pub(crate) async fn check_concurrent_same_content(store: Arc<dyn Store>) {
    let file = fake_file(256 * 1024);
    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let store = Arc::clone(&store);
            let file = file.clone();
            tokio::spawn(async move {
                let mut writer = store.start_writing();
                if i % 2 == 0 {
                    writer.write(&file).unwrap();
                    writer.commit().await
                } else {
                    writer.write_and_commit(file).await
                }
            })
        })
        .collect();

    let mut hashes = HashSet::new();
    for task in tasks {
        let blob = task.await.expect("task should not panic").unwrap();
        hashes.insert(blob.hash);
    }
    assert_eq!(hashes.len(), 1);
    let hash = hashes.into_iter().next().unwrap();
    assert_readable(store.as_ref(), hash, &file).await;
}

/// Generates one test per shared check for a backend constructor.
macro_rules! store_suite {
    ($make:expr) => {
        #[tokio::test]
        async fn suite_empty_blob() {
            let (_guard, store) = $make;
            $crate::testing::check_empty_blob(&store).await;
        }

        #[tokio::test]
        async fn suite_small_file() {
            let (_guard, store) = $make;
            $crate::testing::check_small_file(&store).await;
        }

        #[tokio::test]
        async fn suite_small_file_split() {
            let (_guard, store) = $make;
            $crate::testing::check_small_file_split(&store).await;
        }

        #[tokio::test]
        async fn suite_end_of_stream() {
            let (_guard, store) = $make;
            $crate::testing::check_end_of_stream(&store).await;
        }

        #[tokio::test]
        async fn suite_large_file() {
            let (_guard, store) = $make;
            $crate::testing::check_large_file(&store).await;
        }

        #[tokio::test]
        async fn suite_seek() {
            let (_guard, store) = $make;
            $crate::testing::check_seek(&store).await;
        }

        #[tokio::test]
        async fn suite_dedup() {
            let (_guard, store) = $make;
            $crate::testing::check_dedup(&store).await;
        }

        #[tokio::test]
        async fn suite_missing() {
            let (_guard, store) = $make;
            $crate::testing::check_missing(&store).await;
        }

        #[tokio::test]
        async fn suite_uncommitted_writer_leaves_nothing() {
            let (_guard, store) = $make;
            $crate::testing::check_uncommitted_writer_leaves_nothing(&store).await;
        }

        #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
        async fn suite_concurrent_same_content() {
            let (_guard, store) = $make;
            $crate::testing::check_concurrent_same_content(std::sync::Arc::new(store)).await;
        }
    };
}

pub(crate) use store_suite;
