//! Configuration file loading.

use super::types::TributaryConfig;
use crate::TributaryError;
use std::path::Path;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate a config file.
    /// JSON (.json) or YAML (.yaml/.yml) is chosen by extension; anything else
    /// is tried as JSON first, then YAML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<TributaryConfig, TributaryError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| TributaryError::from_config_error(e, "config loading"))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        let config: TributaryConfig = match extension.to_lowercase().as_str() {
            "json" => serde_json::from_str(&content)
                .map_err(|e| TributaryError::from_config_error(e, "JSON config parsing"))?,
            "yaml" | "yml" => serde_yaml::from_str(&content)
                .map_err(|e| TributaryError::from_config_error(e, "YAML config parsing"))?,
            _ => serde_json::from_str(&content)
                .or_else(|_| serde_yaml::from_str(&content))
                .map_err(|e| {
                    TributaryError::from_config_error(e, "config parsing (tried both JSON and YAML)")
                })?,
        };

        config.validate()?;
        Ok(config)
    }
}
