//! Content-addressed blob storage.
//!
//! Blobs are immutable byte sequences identified by the MD5 [`Hash`] of
//! their content. Writing the same bytes twice yields one stored copy.
//!
//! # Writing
//!
//! Every backend hands out a [`StoreWriter`] from
//! [`WriteOnlyStore::start_writing`]. The writer hashes bytes as they
//! arrive, streams them to the backend, and on [`StoreWriter::commit`] asks
//! the backend to publish the blob under its hash unless it is already
//! stored.
//!
//! # Storage Backends
//!
//! - [`DiskStore`] -- one file per blob under a sharded directory tree
//! - [`MappedStore`] -- append-only log in a fixed-size memory-mapped file
//! - [`MemoryStore`] -- `HashMap`-based store for tests and embedding
//! - [`NullStore`] -- write-only, discards everything
//!
//! # Design Rules
//!
//! 1. A blob is visible under its hash only once fully written.
//! 2. Losing a race to publish the same hash is success, never an error.
//! 3. A writer commits at most once; later commits replay the outcome.
//! 4. Readers tolerate blobs disappearing between lookup and open.

pub mod config;
pub mod disk;
pub mod error;
pub mod ext;
pub mod factory;
pub mod mapped;
pub mod memory;
pub mod null;
pub mod traits;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

pub use cas_types::{ContentHasher, Hash, WrittenBlob};
pub use tokio_util::sync::CancellationToken;

// Re-export primary types at crate root for ergonomic imports.
pub use config::{DiskConfig, MappedConfig, StoreConfig};
pub use disk::DiskStore;
pub use error::{StoreError, StoreResult};
pub use ext::{import_blobs, write_bytes, write_stream};
pub use factory::{DiskStoreFactory, MappedStoreFactory, MemoryStoreFactory, StoreFactory};
pub use mapped::MappedStore;
pub use memory::MemoryStore;
pub use null::NullStore;
pub use traits::{
    BlobRead, BlobSink, BlobStream, PendingWrite, PersistOutcome, ReadBlobRef, ReadOnlyStore,
    Store, StoreKey, WriteOnlyStore,
};
pub use writer::{StoreWriter, WRITE_BUFFER_SIZE};
