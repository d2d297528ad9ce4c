use ai_pipeline::BackendConfig;
use anyhow::{Context, Result};
use scenarios::StoreConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings file of the `corkscene` binary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        scenarios::app_data_dir().join("config.json")
    }

    /// Read `path`, or the default location. A missing default file yields
    /// the built-in settings; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path(), false),
        };
        if !explicit && !path.exists() {
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("invalid config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ai_pipeline::{BackendType, ModelMode};

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "backend": { "backend_type": "mock", "mode": "advanced" }, "store": { "max_dimension": 640 } }"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.backend.backend_type, BackendType::Mock);
        assert_eq!(config.backend.mode, ModelMode::Advanced);
        assert_eq!(config.backend.app_name, "corkbrick");
        assert_eq!(config.store.max_dimension, 640);
        assert_eq!(config.store.jpeg_quality, 70);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("absent.json"))).is_err());
    }
}
