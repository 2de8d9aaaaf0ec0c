use std::fmt;

use serde::{Deserialize, Serialize};

use crate::hash::Hash;

/// A blob that was successfully committed to a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WrittenBlob {
    /// Content hash of the blob.
    pub hash: Hash,
    /// Size of the blob, in bytes.
    pub size: u64,
}

impl WrittenBlob {
    pub fn new(hash: Hash, size: u64) -> Self {
        Self { hash, size }
    }
}

impl fmt::Display for WrittenBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.hash, self.size)
    }
}
