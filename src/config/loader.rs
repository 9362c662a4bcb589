//! Configuration file import/export.

use crate::error::ConfigError;
use crate::models::Configuration;
use std::fs;
use std::path::Path;

/// Load a launch configuration from a JSON file.
pub fn load_config_from_file(path: &Path) -> Result<Configuration, ConfigError> {
    validate_config_path(path)?;

    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound(path.display().to_string())
        } else {
            ConfigError::IoError(e)
        }
    })?;

    let config: Configuration = serde_json::from_str(&content)?;
    Ok(config)
}

/// Save a launch configuration to a JSON file, creating parent directories.
pub fn save_config_to_file(config: &Configuration, path: &Path) -> Result<(), ConfigError> {
    validate_config_path(path)?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json_content = serde_json::to_string_pretty(config)?;
    fs::write(path, json_content)?;
    Ok(())
}

/// Validate config path (.json extension required).
pub fn validate_config_path(path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Configuration path cannot be empty".to_string(),
        ));
    }

    match path.extension() {
        Some(ext) if ext == "json" => Ok(()),
        Some(ext) => Err(ConfigError::ValidationFailed(format!(
            "Configuration file must have .json extension, got .{}",
            ext.to_string_lossy()
        ))),
        None => Err(ConfigError::ValidationFailed(
            "Configuration file must have .json extension".to_string(),
        )),
    }
}
