//! Small per-store metadata (fetch watermarks and similar cursors).

use harmonized_types::{Data, StorageError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Size limit of one metadata entry, in encoded bytes.
pub const DEFAULT_METADATA_LIMIT: usize = 64 * 1024;

/// Prefix of the namespace key under which a store's metadata lives.
pub const METADATA_KEY_PREFIX: &str = "harmonizedMeta_";

pub fn metadata_key(store_name: &str) -> String {
    format!("{METADATA_KEY_PREFIX}{store_name}")
}

/// Key-value text store. Calls are synchronous.
pub trait MetadataStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<Data>, StorageError>;
    fn write(&self, key: &str, value: &Data) -> Result<(), StorageError>;
}

fn encode(key: &str, value: &Data, limit: usize) -> Result<String, StorageError> {
    let content = serde_json::to_string(value)?;
    if content.len() > limit {
        return Err(StorageError::MetadataTooLarge {
            store: key.to_string(),
            size: content.len(),
            limit,
        });
    }
    Ok(content)
}

/// One JSON file per key inside a directory.
pub struct JsonFileMetadataStore {
    dir: PathBuf,
    limit: usize,
}

impl JsonFileMetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), limit: DEFAULT_METADATA_LIMIT }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl MetadataStore for JsonFileMetadataStore {
    fn read(&self, key: &str) -> Result<Option<Data>, StorageError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn write(&self, key: &str, value: &Data) -> Result<(), StorageError> {
        let content = encode(key, value, self.limit)?;
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let temp_path = path.with_extension("json.tmp");

        // Atomic write
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

/// Process-local metadata, shared between channels through an `Arc`.
pub struct MemoryMetadataStore {
    entries: Mutex<HashMap<String, String>>,
    limit: usize,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()), limit: DEFAULT_METADATA_LIMIT }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl Default for MemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn read(&self, key: &str) -> Result<Option<Data>, StorageError> {
        self.entries
            .lock()
            .get(key)
            .map(|content| serde_json::from_str(content).map_err(StorageError::from))
            .transpose()
    }

    fn write(&self, key: &str, value: &Data) -> Result<(), StorageError> {
        let content = encode(key, value, self.limit)?;
        self.entries.lock().insert(key.to_string(), content);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: serde_json::Value) -> Data {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_metadata_key() {
        assert_eq!(metadata_key("testStore"), "harmonizedMeta_testStore");
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        assert!(store.read("harmonizedMeta_users").unwrap().is_none());

        store.write("harmonizedMeta_users", &data(json!({"lastModified": 1200}))).unwrap();
        let reopened = JsonFileMetadataStore::new(dir.path());
        let value = reopened.read("harmonizedMeta_users").unwrap().unwrap();
        assert_eq!(value["lastModified"], json!(1200));
        assert!(!dir.path().join("harmonizedMeta_users.json.tmp").exists());
    }

    #[test]
    fn test_size_limit_enforced() {
        let store = MemoryMetadataStore::new().with_limit(16);
        let err = store.write("k", &data(json!({"payload": "0123456789abcdef"}))).unwrap_err();
        assert!(matches!(err, StorageError::MetadataTooLarge { limit: 16, .. }));
        assert!(store.read("k").unwrap().is_none());
    }

    #[test]
    fn test_unsafe_key_characters_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        store.write("harmonizedMeta_../x", &data(json!({"a": 1}))).unwrap();
        assert!(dir.path().join("harmonizedMeta____x.json").exists());
    }
}
