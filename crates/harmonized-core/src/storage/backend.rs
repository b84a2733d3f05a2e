//! Storage backend contract.

use async_trait::async_trait;
use harmonized_types::{Data, RecordKey, StorageError};

/// A durable item store holding one collection per store name.
///
/// Items are JSON objects. `key_field` names the field that carries the
/// backend-assigned key: `put` reads it to decide between insert and update,
/// and `get`/`get_all` write it back into the returned items.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open the physical connection. Called once per shared connection.
    async fn open(&self) -> Result<(), StorageError>;

    async fn get(
        &self,
        store: &str,
        key_field: &str,
        key: &RecordKey,
    ) -> Result<Option<Data>, StorageError>;

    /// Insert or replace, returning the item's key.
    async fn put(&self, store: &str, key_field: &str, item: Data)
        -> Result<RecordKey, StorageError>;

    /// Remove by key. Removing a missing key is not an error.
    async fn remove(&self, store: &str, key: &RecordKey) -> Result<(), StorageError>;

    /// Every item of `store`, in key order.
    async fn get_all(&self, store: &str, key_field: &str) -> Result<Vec<Data>, StorageError>;
}
