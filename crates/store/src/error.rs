//! Typed error type for the store crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found: '{0}'")]
    NotFound(String),

    #[error("invalid key '{0}': keys must be non-empty and may not contain NUL")]
    InvalidKey(String),

    #[error("store is closed")]
    Closed,

    #[error("unsupported store url '{0}' (expected memory, file:<dir> or sqlite:<path>)")]
    UnsupportedUrl(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
