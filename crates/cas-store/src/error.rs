use std::sync::Arc;

use cas_types::{Hash, TypeError};

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested blob does not exist in the store.
    ///
    /// The realm is descriptive context only and may be absent.
    #[error("no such blob {hash}{}", realm_suffix(.realm))]
    NoSuchBlob { hash: Hash, realm: Option<String> },

    /// A writer was used after a commit was requested or after it failed.
    #[error("invalid writer state: {reason}")]
    InvalidState {
        reason: &'static str,
        #[source]
        cause: Option<Arc<StoreError>>,
    },

    /// The backend failed to persist the blob. The writer is unusable.
    #[error("commit failed: {0}")]
    CommitFailure(#[source] Arc<StoreError>),

    /// A copied blob does not hash to the hash it was requested under.
    #[error("hash mismatch: expected {expected}, computed {actual}")]
    HashMismatch { expected: Hash, actual: Hash },

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The memory-mapped log has no room left for the record.
    #[error("mapped store full: record needs {needed} bytes, capacity is {capacity}")]
    CapacityExceeded { needed: u64, capacity: u64 },

    /// The factory does not serve the requested account.
    #[error("store serves realm {expected}, not account {actual}")]
    RealmMismatch { expected: i64, actual: i64 },

    /// Malformed hash input.
    #[error(transparent)]
    InvalidHash(#[from] TypeError),

    /// Invalid or unreadable configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn no_such_blob(hash: Hash) -> Self {
        Self::NoSuchBlob { hash, realm: None }
    }

    pub fn no_such_blob_in(hash: Hash, realm: impl Into<String>) -> Self {
        Self::NoSuchBlob {
            hash,
            realm: Some(realm.into()),
        }
    }

    /// Returns `true` for a [`StoreError::NoSuchBlob`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NoSuchBlob { .. })
    }

    pub(crate) fn from_join(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Io(std::io::Error::other(err.to_string()))
        }
    }
}

fn realm_suffix(realm: &Option<String>) -> String {
    realm
        .as_deref()
        .map(|r| format!(" in realm {r}"))
        .unwrap_or_default()
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
