use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hash format: {0}")]
    InvalidFormat(String),

    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Result alias for type operations.
pub type TypeResult<T> = Result<T, TypeError>;
