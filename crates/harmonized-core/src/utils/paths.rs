use harmonized_types::ConfigError;
use std::fs;
use std::path::PathBuf;

const DATA_DIR: &str = ".harmonized";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "HARMONIZED_DATA_DIR";

/// Get data directory path, creating it if needed.
///
/// Priority:
/// 1. `HARMONIZED_DATA_DIR` environment variable (for container deployments)
/// 2. `~/.harmonized` (default for desktop usage)
pub fn get_data_dir() -> Result<PathBuf, ConfigError> {
    let data_dir = if let Ok(custom_dir) = std::env::var(DATA_DIR_ENV) {
        PathBuf::from(custom_dir)
    } else {
        let home = dirs::home_dir().ok_or_else(|| ConfigError::NotFound {
            path: "home directory".to_string(),
        })?;
        home.join(DATA_DIR)
    };

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir).map_err(|e| ConfigError::WriteError {
            message: format!("Failed to create data directory {}: {}", data_dir.display(), e),
        })?;
    }

    Ok(data_dir)
}
