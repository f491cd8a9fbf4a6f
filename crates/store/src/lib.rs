//! `store` crate — durable key/value backing for execution state.
//!
//! Provides the [`KeyValueStore`] contract plus three backends: in-memory,
//! a directory of files, and an embedded SQLite database. No execution
//! semantics live here.

pub mod error;
pub mod file;
pub mod memory;
pub mod sqlite;
pub mod traits;

use std::path::Path;
use std::sync::Arc;

pub use error::StoreError;
pub use file::FileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::KeyValueStore;

/// Open a store from a URL-ish description.
///
/// Accepted forms: `memory`, `file:<dir>`, `sqlite:<path>`.
pub fn open(url: &str) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    if url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    if let Some(dir) = url.strip_prefix("file:").filter(|d| !d.is_empty()) {
        return Ok(Arc::new(FileStore::open(dir)?));
    }
    if let Some(path) = url.strip_prefix("sqlite:").filter(|p| !p.is_empty()) {
        return Ok(Arc::new(SqliteStore::open(Path::new(path))?));
    }
    Err(StoreError::UnsupportedUrl(url.to_owned()))
}

/// Like [`open`], but keeps `namespace`'s keys apart from every other
/// namespace sharing the same location: a sub-directory for `file:`, a
/// namespace column for `sqlite:`. A `memory` store is private anyway.
pub fn open_namespaced(url: &str, namespace: &str) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    if namespace.is_empty() {
        return Err(StoreError::InvalidKey("empty namespace".into()));
    }
    if let Some(dir) = url.strip_prefix("file:").filter(|d| !d.is_empty()) {
        let root = Path::new(dir).join(file::encode_key(namespace));
        return Ok(Arc::new(FileStore::open(root)?));
    }
    if let Some(path) = url.strip_prefix("sqlite:").filter(|p| !p.is_empty()) {
        return Ok(Arc::new(SqliteStore::open_namespaced(Path::new(path), namespace)?));
    }
    open(url)
}
