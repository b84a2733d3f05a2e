//! Model schema files.

use harmonized_types::{ConfigError, ModelSchema};
use std::fs;
use std::path::Path;

/// Default schema file name inside the data directory.
pub const SCHEMA_FILE: &str = "schema.json";

/// Load and validate a schema file.
pub fn load_schema(path: &Path) -> Result<ModelSchema, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound { path: path.display().to_string() });
    }
    let content = fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError { message: format!("{}: {}", path.display(), e) })?;
    let schema = ModelSchema::from_json_str(&content)?;
    validate_schema(&schema)?;
    Ok(schema)
}

/// Save a schema file atomically.
pub fn save_schema(path: &Path, schema: &ModelSchema) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(schema)
        .map_err(|e| ConfigError::WriteError { message: e.to_string() })?;
    let temp_path = path.with_extension("json.tmp");

    // Atomic write
    fs::write(&temp_path, content)
        .map_err(|e| ConfigError::WriteError { message: e.to_string() })?;
    fs::rename(&temp_path, path).map_err(|e| ConfigError::WriteError { message: e.to_string() })
}

/// Every model must resolve and carry an absolute http(s) base URL.
pub fn validate_schema(schema: &ModelSchema) -> Result<(), ConfigError> {
    for name in schema.model_names() {
        let options = schema.resolve(name, None)?;
        let parsed = url::Url::parse(&options.base_url).map_err(|e| ConfigError::ValidationError {
            field: format!("{name}.base_url"),
            message: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(ConfigError::ValidationError {
                field: format!("{name}.base_url"),
                message: format!("unsupported scheme {}", parsed.scheme()),
            });
        }
    }
    Ok(())
}
