//! Store error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the database and artifact layers
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Invalid encryption key: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Task {0} not found")]
    TaskNotFound(i64),

    #[error("Incomplete test set: missing {0:?}")]
    IncompleteTests(Vec<String>),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}
