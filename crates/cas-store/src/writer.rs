//! The hashing writer shared by every backend.
//!
//! A [`StoreWriter`] accepts an ordered byte stream through two entry points:
//!
//! - [`StoreWriter::write`] copies into a rolling 4 MiB buffer. When the
//!   buffer fills up it is handed to the backend without waiting for the
//!   backend to finish, and a fresh buffer takes its place.
//! - [`StoreWriter::write_async`] dispatches any buffered bytes first, then
//!   the new bytes, and waits until the backend has accepted all of them.
//!
//! Both paths go through the same dispatch queue, so bytes always reach the
//! backend in call order. On commit, whatever is still buffered is not
//! written eagerly: it travels inside a [`PendingWrite`] that the backend only
//! writes out if no blob with the same hash exists yet.

use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use cas_types::{ContentHasher, WrittenBlob};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{BlobSink, PendingWrite, PersistOutcome};

/// Size of the rolling buffer used by [`StoreWriter::write`] and of each
/// chunk read by [`StoreWriter::write_from`].
pub const WRITE_BUFFER_SIZE: usize = 4 * 1024 * 1024;

type SharedSink = Arc<Mutex<Box<dyn BlobSink>>>;

type InFlight = Pin<Box<dyn Future<Output = StoreResult<()>> + Send>>;

enum WriterState {
    /// Accepting bytes.
    Writing,
    /// Suspended inside `write_async` or `write_from`.
    Flushing,
    /// Suspended inside a commit.
    CommitRequested,
    Committed(WrittenBlob, PersistOutcome),
    Failed(Arc<StoreError>),
}

/// Write session for a single prospective blob.
///
/// States move `Writing → CommitRequested → Committed | Failed`. Once a commit
/// was requested the writer never accepts bytes again. Once failed, every
/// later call reports the original failure.
///
/// Every operation takes `&mut self`, so a writer cannot be driven from two
/// tasks at once; repeated commits are answered from the memoized outcome.
/// If an async call is dropped while suspended, the writer counts it as
/// cancelled and moves to `Failed`.
pub struct StoreWriter {
    sink: SharedSink,
    hasher: ContentHasher,
    /// Bytes passed to `hasher` so far.
    hashed: u64,
    /// Pending bytes from the synchronous path. Not hashed yet.
    buffer: BytesMut,
    /// Completes once every dispatched chunk has reached the sink.
    in_flight: Option<InFlight>,
    /// Where fire-and-forget flushes are spawned. Without a runtime they run
    /// lazily, on the next awaited call.
    runtime: Option<Handle>,
    cancel: CancellationToken,
    commit_requested: bool,
    state: WriterState,
}

impl StoreWriter {
    /// Create a writer that persists through `sink`.
    pub fn new(sink: impl BlobSink) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            hasher: ContentHasher::new(),
            hashed: 0,
            buffer: BytesMut::new(),
            in_flight: None,
            runtime: Handle::try_current().ok(),
            cancel: CancellationToken::new(),
            commit_requested: false,
            state: WriterState::Writing,
        }
    }

    /// Abort pending and future operations when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Bytes accepted so far, through either path.
    pub fn size(&self) -> u64 {
        self.hashed + self.buffer.len() as u64
    }

    /// Whether `commit` or `write_and_commit` has been called.
    pub fn commit_requested(&self) -> bool {
        self.commit_requested
    }

    pub fn is_committed(&self) -> bool {
        matches!(self.state, WriterState::Committed(..))
    }

    /// The committed blob, once the commit succeeded.
    pub fn committed_blob(&self) -> Option<WrittenBlob> {
        match self.state {
            WriterState::Committed(blob, _) => Some(blob),
            _ => None,
        }
    }

    /// Whether the commit stored new bytes or found them already present.
    pub fn outcome(&self) -> Option<PersistOutcome> {
        match self.state {
            WriterState::Committed(_, outcome) => Some(outcome),
            _ => None,
        }
    }

    /// The error that put this writer in the failed state, if any.
    pub fn failure(&self) -> Option<&StoreError> {
        match &self.state {
            WriterState::Failed(cause) => Some(cause),
            _ => None,
        }
    }

    /// Append bytes through the buffered path. Never waits for I/O.
    pub fn write(&mut self, mut data: &[u8]) -> StoreResult<()> {
        self.check_writable()?;
        while !data.is_empty() {
            if self.buffer.capacity() == 0 {
                self.buffer.reserve(WRITE_BUFFER_SIZE);
            }
            let n = (WRITE_BUFFER_SIZE - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..n]);
            data = &data[n..];
            if self.buffer.len() == WRITE_BUFFER_SIZE {
                self.rotate_buffer();
            }
        }
        Ok(())
    }

    /// Hand the buffered bytes to the backend without waiting for them to be
    /// persisted.
    pub fn flush_buffer(&mut self) -> StoreResult<()> {
        self.check_writable()?;
        self.rotate_buffer();
        Ok(())
    }

    /// Hand the buffered bytes to the backend and wait until every byte
    /// written so far has been accepted.
    pub async fn flush(&mut self) -> StoreResult<()> {
        self.write_async(Bytes::new()).await
    }

    /// Append bytes through the direct path.
    ///
    /// Buffered bytes from earlier [`StoreWriter::write`] calls are forwarded
    /// first, so ordering is preserved.
    pub async fn write_async(&mut self, data: impl Into<Bytes>) -> StoreResult<()> {
        self.check_writable()?;
        let data = data.into();
        self.rotate_buffer();
        if !data.is_empty() {
            self.dispatch(data);
        }

        self.state = WriterState::Flushing;
        match self.drain().await {
            Ok(()) => {
                self.state = WriterState::Writing;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Copy from `reader` until it reports end of data, or until `max_bytes`
    /// bytes have been copied. Returns the number of bytes copied.
    ///
    /// Reads fill one buffer while the previous one is being persisted; at
    /// most two buffers are alive at any time.
    pub async fn write_from<R>(&mut self, reader: R, max_bytes: Option<u64>) -> StoreResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.check_writable()?;
        self.rotate_buffer();

        self.state = WriterState::Flushing;
        match self.pump(reader, max_bytes).await {
            Ok(total) => {
                self.state = WriterState::Writing;
                Ok(total)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Finalize the hash and persist the blob.
    ///
    /// Idempotent: the first call does the work, every later call returns
    /// the same blob, or the same failure, without touching the backend.
    pub async fn commit(&mut self) -> StoreResult<WrittenBlob> {
        self.abandon_suspended();
        match &self.state {
            WriterState::Committed(blob, _) => return Ok(*blob),
            WriterState::Failed(cause) => return Err(StoreError::CommitFailure(cause.clone())),
            _ => {}
        }
        let tail = self.take_buffer().into_iter().collect();
        self.finish(tail).await
    }

    /// Equivalent to [`StoreWriter::write_async`] followed by
    /// [`StoreWriter::commit`], except that `data` joins the deferred tail
    /// and is only written if the blob is not already stored.
    pub async fn write_and_commit(&mut self, data: impl Into<Bytes>) -> StoreResult<WrittenBlob> {
        self.check_writable()?;
        let data = data.into();
        let mut tail: Vec<Bytes> = self.take_buffer().into_iter().collect();
        if !data.is_empty() {
            tail.push(data);
        }
        self.finish(tail).await
    }

    async fn finish(&mut self, tail: Vec<Bytes>) -> StoreResult<WrittenBlob> {
        self.commit_requested = true;
        for chunk in &tail {
            self.hasher.update(chunk);
            self.hashed += chunk.len() as u64;
        }
        let hash = std::mem::take(&mut self.hasher).finalize();
        let blob = WrittenBlob::new(hash, self.hashed);
        self.state = WriterState::CommitRequested;

        let in_flight = self.in_flight.take();
        let sink = Arc::clone(&self.sink);
        let pending = PendingWrite::new(tail);
        let token = self.cancel.clone();
        let result = guarded(&token, async move {
            if let Some(in_flight) = in_flight {
                in_flight.await?;
            }
            let mut sink = sink.lock().await;
            sink.persist_if_absent(blob, pending).await
        })
        .await;

        match result {
            Ok(outcome) => {
                debug!(hash = %blob.hash, size = blob.size, ?outcome, "blob committed");
                self.state = WriterState::Committed(blob, outcome);
                Ok(blob)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    async fn pump<R>(&mut self, mut reader: R, max_bytes: Option<u64>) -> StoreResult<u64>
    where
        R: AsyncRead + Unpin + Send,
    {
        let token = self.cancel.clone();
        let mut total = 0u64;
        let mut eof = false;
        loop {
            let limit = match max_bytes {
                Some(max) => (max - total).min(WRITE_BUFFER_SIZE as u64) as usize,
                None => WRITE_BUFFER_SIZE,
            };
            let mut buf = vec![0u8; if eof { 0 } else { limit }];
            let mut filled = 0;
            while !eof && filled < limit {
                let read = guarded(&token, async {
                    reader.read(&mut buf[filled..]).await.map_err(StoreError::from)
                })
                .await?;
                if read == 0 {
                    eof = true;
                }
                filled += read;
            }
            total += filled as u64;

            // The previous buffer must be released before the next one is sent.
            if let Some(in_flight) = self.in_flight.take() {
                guarded(&token, in_flight).await?;
            }
            if filled == 0 {
                return Ok(total);
            }
            buf.truncate(filled);
            self.dispatch(Bytes::from(buf));
        }
    }

    /// Hash `chunk` and queue it for the sink behind every earlier chunk.
    fn dispatch(&mut self, chunk: Bytes) {
        self.hasher.update(&chunk);
        self.hashed += chunk.len() as u64;

        let previous = self.in_flight.take();
        let sink = Arc::clone(&self.sink);
        let task = async move {
            if let Some(previous) = previous {
                previous.await?;
            }
            sink.lock().await.write_chunk(chunk).await
        };

        self.in_flight = Some(match &self.runtime {
            Some(handle) => {
                let handle = handle.spawn(task);
                Box::pin(async move { handle.await.map_err(StoreError::from_join)? })
            }
            None => Box::pin(task),
        });
    }

    /// Dispatch the buffered bytes, if any.
    fn rotate_buffer(&mut self) {
        if let Some(chunk) = self.take_buffer() {
            self.dispatch(chunk);
        }
    }

    fn take_buffer(&mut self) -> Option<Bytes> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.split().freeze())
        }
    }

    async fn drain(&mut self) -> StoreResult<()> {
        let token = self.cancel.clone();
        match self.in_flight.take() {
            Some(in_flight) => guarded(&token, in_flight).await,
            None => Ok(()),
        }
    }

    fn check_writable(&mut self) -> StoreResult<()> {
        self.abandon_suspended();
        if let WriterState::Failed(cause) = &self.state {
            return Err(StoreError::InvalidState {
                reason: "writer failed earlier",
                cause: Some(cause.clone()),
            });
        }
        if self.commit_requested {
            return Err(StoreError::InvalidState {
                reason: "commit already requested",
                cause: None,
            });
        }
        Ok(())
    }

    /// A suspended state observed on entry means the future that set it was
    /// dropped mid-flight. Its bytes may or may not have reached the backend.
    fn abandon_suspended(&mut self) {
        if matches!(
            self.state,
            WriterState::Flushing | WriterState::CommitRequested
        ) {
            self.fail(StoreError::Cancelled);
        }
    }

    fn fail(&mut self, err: StoreError) -> StoreError {
        debug!(error = %err, size = self.size(), "store writer failed");
        let cancelled = matches!(err, StoreError::Cancelled);
        let cause = Arc::new(err);
        self.state = WriterState::Failed(cause.clone());
        self.in_flight = None;
        self.buffer.clear();
        if cancelled {
            StoreError::Cancelled
        } else {
            StoreError::CommitFailure(cause)
        }
    }
}

/// Run `fut` unless `token` is cancelled first.
async fn guarded<T, F>(token: &CancellationToken, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(StoreError::Cancelled),
        result = fut => result,
    }
}

/// Blocking-style adapter over the buffered path.
impl io::Write for StoreWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        StoreWriter::write(self, buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        StoreWriter::flush_buffer(self).map_err(io::Error::other)
    }
}

impl fmt::Debug for StoreWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            WriterState::Writing => "writing",
            WriterState::Flushing => "flushing",
            WriterState::CommitRequested => "commit-requested",
            WriterState::Committed(..) => "committed",
            WriterState::Failed(_) => "failed",
        };
        f.debug_struct("StoreWriter")
            .field("state", &state)
            .field("size", &self.size())
            .finish()
    }
}
