//! Runtime choice of the storage backend.
//!
//! Probes run in order, once per selector; the first one that succeeds
//! supplies the single shared [`Connection`] every storage channel uses.

use harmonized_types::{KeyNames, StorageError, SyncErrorEvent};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;

use super::backend::StorageBackend;
use super::connection::Connection;
use super::memory::MemoryBackend;
use super::metadata::{JsonFileMetadataStore, MemoryMetadataStore, MetadataStore};
use super::sqlite::SqliteBackend;
use super::StorageChannel;

/// Database file inside the data directory.
pub const DATABASE_FILE: &str = "harmonized.db";
/// Metadata directory inside the data directory.
pub const METADATA_DIR: &str = "meta";

/// Checks whether a backend can run here and builds it.
pub trait BackendProbe: Send + Sync {
    fn name(&self) -> &'static str;
    fn probe(&self) -> Result<Arc<dyn StorageBackend>, StorageError>;
}

/// Available when the database file can be created and opened.
pub struct SqliteProbe {
    path: PathBuf,
}

impl SqliteProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl BackendProbe for SqliteProbe {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn probe(&self) -> Result<Arc<dyn StorageBackend>, StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        rusqlite::Connection::open(&self.path)
            .map_err(|e| StorageError::Unavailable { message: e.to_string() })?;
        Ok(Arc::new(SqliteBackend::new(&self.path)))
    }
}

/// Always available.
pub struct MemoryProbe;

impl BackendProbe for MemoryProbe {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn probe(&self) -> Result<Arc<dyn StorageBackend>, StorageError> {
        Ok(Arc::new(MemoryBackend::new()))
    }
}

pub struct BackendSelector {
    probes: Vec<Box<dyn BackendProbe>>,
    metadata: Arc<dyn MetadataStore>,
    selected: OnceLock<Option<Arc<Connection>>>,
}

static GLOBAL_SELECTOR: OnceLock<BackendSelector> = OnceLock::new();

impl BackendSelector {
    pub fn new(probes: Vec<Box<dyn BackendProbe>>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { probes, metadata, selected: OnceLock::new() }
    }

    /// SQLite database and JSON metadata files under `dir`.
    pub fn with_data_dir(dir: &Path) -> Self {
        Self::new(
            vec![Box::new(SqliteProbe::new(dir.join(DATABASE_FILE)))],
            Arc::new(JsonFileMetadataStore::new(dir.join(METADATA_DIR))),
        )
    }

    /// Process-wide selector over the default data directory.
    pub fn global() -> &'static Self {
        GLOBAL_SELECTOR.get_or_init(|| match crate::utils::paths::get_data_dir() {
            Ok(dir) => Self::with_data_dir(&dir),
            Err(e) => {
                tracing::warn!("⚠️ No data directory ({}), local storage disabled", e);
                Self::new(Vec::new(), Arc::new(MemoryMetadataStore::new()))
            },
        })
    }

    /// The shared connection of the first available backend, probing on first use.
    pub fn connection(&self) -> Option<Arc<Connection>> {
        self.selected.get_or_init(|| self.probe()).clone()
    }

    pub fn metadata_store(&self) -> Arc<dyn MetadataStore> {
        Arc::clone(&self.metadata)
    }

    fn probe(&self) -> Option<Arc<Connection>> {
        for probe in &self.probes {
            match probe.probe() {
                Ok(backend) => {
                    tracing::info!("💾 Using {} storage backend", probe.name());
                    return Some(Connection::new(backend));
                },
                Err(e) => tracing::debug!("Storage backend {} unavailable: {}", probe.name(), e),
            }
        }
        tracing::warn!("⚠️ No storage backend available");
        None
    }

    /// A storage channel for `store_name`, or `None` without a usable backend.
    pub fn create_storage_handler(
        &self,
        store_name: &str,
        keys: KeyNames,
        errors: broadcast::Sender<SyncErrorEvent>,
    ) -> Option<StorageChannel> {
        let connection = self.connection()?;
        match StorageChannel::new(store_name, keys, connection, self.metadata_store(), errors) {
            Ok(channel) => Some(channel),
            Err(e) => {
                tracing::error!("Failed to create storage channel for {}: {}", store_name, e);
                None
            },
        }
    }
}
