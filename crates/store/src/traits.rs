//! The `KeyValueStore` trait — the durable backing contract for execution state.

use async_trait::async_trait;

use crate::StoreError;

/// A flat, byte-valued key/value store.
///
/// Implementations need not be transactional; callers that require
/// read-modify-write consistency serialize access themselves. Every method
/// must be safe to call from concurrent tasks.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Insert or overwrite `key`.
    async fn save(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    /// Fetch the value stored under `key`.
    ///
    /// Returns [`StoreError::NotFound`] if the key is absent.
    async fn load(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Remove `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// All keys currently stored, in ascending order.
    async fn list(&self) -> Result<Vec<String>, StoreError>;

    /// Release underlying resources. Later calls fail with [`StoreError::Closed`].
    async fn close(&self) -> Result<(), StoreError>;
}

pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.is_empty() || key.contains('\0') {
        return Err(StoreError::InvalidKey(key.to_owned()));
    }
    Ok(())
}
