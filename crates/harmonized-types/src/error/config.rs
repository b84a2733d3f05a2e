//! Configuration-related errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading or resolving a model schema.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum ConfigError {
    /// Schema file not found at expected path
    #[error("Schema not found: {path}")]
    NotFound {
        /// Filesystem path where the schema was expected
        path: String,
    },

    /// Schema file parse error
    #[error("Schema parse error: {message}")]
    ParseError {
        /// Description of the parse failure
        message: String,
    },

    /// No model with that name in the schema
    #[error("Unknown model: {name}")]
    UnknownModel {
        /// Requested model name
        name: String,
    },

    /// Schema validation error (invalid values)
    #[error("Config validation error for {field}: {message}")]
    ValidationError {
        /// Name of the field that failed validation
        field: String,
        /// Description of the validation failure
        message: String,
    },

    /// Write error (permission denied, disk full, etc)
    #[error("Config write error: {message}")]
    WriteError {
        /// Description of the write failure
        message: String,
    },
}
