//! Foundation types for the content-addressed blob store.
//!
//! Every blob is identified by a [`Hash`]: the 128-bit MD5 digest of its
//! exact byte content. Identical bytes always produce the same hash, which is
//! what lets the store keep a single physical copy per distinct blob.
//!
//! # Key Types
//!
//! - [`Hash`] -- 128-bit content identifier with canonical hex and byte forms
//! - [`ContentHasher`] -- incremental hasher producing a [`Hash`]
//! - [`WrittenBlob`] -- hash and size of a committed blob

pub mod blob;
pub mod error;
pub mod hash;

pub use blob::WrittenBlob;
pub use error::{TypeError, TypeResult};
pub use hash::{ContentHasher, Hash};
