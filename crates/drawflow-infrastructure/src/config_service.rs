//! Engine configuration loading.
//!
//! Reads `drawflow.toml` from the platform config directory. A missing file
//! yields the defaults; a malformed file is a configuration error rather
//! than a silent fallback.

use std::path::Path;

use tokio::fs;

use drawflow_core::config::EngineConfig;
use drawflow_core::error::{DrawflowError, Result};

use crate::paths::DrawflowPaths;

/// Loads the engine configuration from the default location.
pub async fn load_config() -> Result<EngineConfig> {
    load_config_from(DrawflowPaths::config_file()?).await
}

/// Loads the engine configuration from an explicit path.
pub async fn load_config_from(path: impl AsRef<Path>) -> Result<EngineConfig> {
    let path = path.as_ref();
    let text = match fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("[Config] no config at {:?}, using defaults", path);
            return Ok(EngineConfig::default());
        }
        Err(e) => return Err(e.into()),
    };
    toml::from_str(&text)
        .map_err(|e| DrawflowError::config(format!("invalid config at {:?}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config_from(dir.path().join("drawflow.toml"))
            .await
            .unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[tokio::test]
    async fn file_overrides_apply() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("drawflow.toml");
        std::fs::write(
            &path,
            r#"
            user_id = "u-42"
            debounce_ms = 800

            [remote]
            base_url = "https://sync.example.com"
            api_key = "secret"
            "#,
        )
        .unwrap();

        let config = load_config_from(&path).await.unwrap();
        assert_eq!(config.user_id, "u-42");
        assert_eq!(config.debounce_ms, 800);
        assert!(config.is_cloud());
    }

    #[tokio::test]
    async fn malformed_file_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("drawflow.toml");
        std::fs::write(&path, "debounce_ms = \"soon\"").unwrap();

        let err = load_config_from(&path).await.unwrap_err();
        assert!(matches!(err, DrawflowError::Config(_)));
    }
}
