//! Persisted user settings.
//!
//! Two keys survive between runs: the default directory merged PDFs are saved
//! to, and an opaque window-geometry blob kept for front ends that have a
//! window. Neither is read implicitly; callers load a [`Settings`] value and
//! pass what they need into the pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{Error, Result};

const SETTINGS_DIR: &str = "pdfgather";
const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_save_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_geometry: Option<String>,
}

impl Settings {
    /// `<config dir>/pdfgather/settings.json`, or a file in the working
    /// directory when the platform has no config directory.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join(SETTINGS_DIR).join(SETTINGS_FILE))
            .unwrap_or_else(|| PathBuf::from(SETTINGS_FILE))
    }

    /// Reads settings from `path`; a missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let data = match fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::Settings {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        serde_json::from_str(&data).map_err(|e| Error::Settings {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let settings_error = |reason: String| Error::Settings {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| settings_error(e.to_string()))?;
        }

        let data = serde_json::to_string_pretty(self).map_err(|e| settings_error(e.to_string()))?;
        fs::write(path, data)
            .await
            .map_err(|e| settings_error(e.to_string()))?;

        debug!("Saved settings to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(&dir.path().join("absent.json")).await.unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("settings.json");
        let settings = Settings {
            default_save_path: Some(PathBuf::from("/srv/handouts")),
            window_geometry: Some("800x600+10+10".to_string()),
        };

        settings.save(&path).await.unwrap();
        assert_eq!(Settings::load(&path).await.unwrap(), settings);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_settings_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = Settings::load(&path).await.unwrap_err();
        assert!(matches!(err, Error::Settings { .. }));
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let settings: Settings =
            serde_json::from_str(r#"{"default_save_path": "/tmp", "theme": "dark"}"#).unwrap();
        assert_eq!(settings.default_save_path, Some(PathBuf::from("/tmp")));
        assert_eq!(settings.window_geometry, None);
    }
}
