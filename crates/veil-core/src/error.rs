use thiserror::Error;

use crate::types::Algorithm;

pub type VeilResult<T> = Result<T, VeilError>;

#[derive(Debug, Error)]
pub enum VeilError {
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("algorithm mismatch: expected {expected}, got {found}")]
    AlgorithmMismatch {
        expected: Algorithm,
        found: Algorithm,
    },

    #[error("empty input: {0}")]
    EmptyInput(String),

    /// Authentication failed. A wrong key and a damaged payload are reported
    /// identically.
    #[error("invalid key or corrupted payload")]
    InvalidKeyOrCorruptPayload,

    #[error("malformed key: {0}")]
    MalformedKey(String),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snippet not found or expired")]
    SnippetNotFound,

    #[error("invalid snippet: {0}")]
    InvalidSnippet(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
