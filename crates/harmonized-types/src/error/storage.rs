//! Local storage errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a storage backend or the metadata store.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum StorageError {
    /// Backend could not be opened in this environment
    #[error("Storage backend unavailable: {message}")]
    Unavailable {
        /// Reason reported by the backend probe
        message: String,
    },

    /// Query or write failed inside the backend
    #[error("Database error: {message}")]
    Database {
        /// Backend error text
        message: String,
    },

    /// Item body could not be (de)serialized
    #[error("Serialization error: {message}")]
    Serialization {
        /// serde_json error text
        message: String,
    },

    /// Item key is missing or not usable by the backend
    #[error("Invalid store key: {key}")]
    InvalidKey {
        /// Offending key, rendered as text
        key: String,
    },

    /// Metadata exceeded the per-store size limit
    #[error("Metadata for {store} is {size} bytes (limit {limit})")]
    MetadataTooLarge {
        /// Store the metadata belongs to
        store: String,
        /// Encoded size in bytes
        size: usize,
        /// Configured limit in bytes
        limit: usize,
    },

    /// Filesystem failure
    #[error("IO error: {message}")]
    Io {
        /// io::Error text
        message: String,
    },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization { message: err.to_string() }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io { message: err.to_string() }
    }
}
