//! In-memory storage backend.

use async_trait::async_trait;
use harmonized_types::{Data, RecordKey, StorageError};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use super::backend::StorageBackend;

#[derive(Default)]
struct MemoryStore {
    items: BTreeMap<RecordKey, Data>,
    last_key: i64,
}

/// Volatile backend. Keys are integers counting up from 1 per store.
#[derive(Default)]
pub struct MemoryBackend {
    stores: Mutex<HashMap<String, MemoryStore>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, store: &str) -> usize {
        self.stores.lock().get(store).map_or(0, |s| s.items.len())
    }

    pub fn is_empty(&self, store: &str) -> bool {
        self.len(store) == 0
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn open(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn get(
        &self,
        store: &str,
        key_field: &str,
        key: &RecordKey,
    ) -> Result<Option<Data>, StorageError> {
        let stores = self.stores.lock();
        Ok(stores.get(store).and_then(|s| s.items.get(key)).map(|item| {
            let mut item = item.clone();
            item.insert(key_field.to_string(), key.to_value());
            item
        }))
    }

    async fn put(
        &self,
        store: &str,
        key_field: &str,
        mut item: Data,
    ) -> Result<RecordKey, StorageError> {
        let mut stores = self.stores.lock();
        let entry = stores.entry(store.to_string()).or_default();
        let key = match item.remove(key_field).as_ref().and_then(RecordKey::from_value) {
            Some(key) => {
                if let RecordKey::Int(n) = key {
                    entry.last_key = entry.last_key.max(n);
                }
                key
            },
            None => {
                entry.last_key += 1;
                RecordKey::Int(entry.last_key)
            },
        };
        entry.items.insert(key.clone(), item);
        Ok(key)
    }

    async fn remove(&self, store: &str, key: &RecordKey) -> Result<(), StorageError> {
        if let Some(entry) = self.stores.lock().get_mut(store) {
            entry.items.remove(key);
        }
        Ok(())
    }

    async fn get_all(&self, store: &str, key_field: &str) -> Result<Vec<Data>, StorageError> {
        let stores = self.stores.lock();
        Ok(stores
            .get(store)
            .map(|s| {
                s.items
                    .iter()
                    .map(|(key, item)| {
                        let mut item = item.clone();
                        item.insert(key_field.to_string(), key.to_value());
                        item
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
