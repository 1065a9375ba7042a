//! Configuration management for pmr
//!
//! Repository-level settings: where the review database lives, how long a
//! caller waits on a single store request, and free-text limits.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{ReviewError, Result};

/// Directory holding pmr state, relative to the workspace root
pub const PMR_DIR: &str = ".pmr";

/// Repository-level configuration
///
/// Loaded from `.pmr/config.toml` in the workspace root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Database file, relative to the workspace root
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Upper bound for a single store request, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub limits: Limits,
}

/// Input limits applied before anything reaches the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum characters for resolutions, reasons, comments and protocol text
    #[serde(default = "default_max_text_length")]
    pub max_text_length: usize,

    /// Maximum drug lines per recommendation
    #[serde(default = "default_max_drugs")]
    pub max_drugs: usize,
}

fn default_database_path() -> PathBuf {
    PathBuf::from(PMR_DIR).join("review.db")
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_max_text_length() -> usize {
    4_000
}

fn default_max_drugs() -> usize {
    16
}

impl ReviewConfig {
    /// Load configuration from `.pmr/config.toml` or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(PMR_DIR).join("config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content).map_err(|e| {
                ReviewError::Validation(format!("Failed to parse config file: {}", e))
            })?;
            config.validate()?;
            debug!(path = %config_path.display(), "loaded review config");
            Ok(config)
        } else {
            debug!("no config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Write default configuration to `.pmr/config.toml`
    pub fn write_default(root: &Path) -> Result<PathBuf> {
        let config_dir = root.join(PMR_DIR);
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default()).map_err(|e| {
            ReviewError::Validation(format!("Failed to serialize config: {}", e))
        })?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(ReviewError::Validation(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.limits.max_text_length == 0 || self.limits.max_drugs == 0 {
            return Err(ReviewError::Validation(
                "limits must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Database path resolved against the workspace root
    pub fn database_path_in(&self, root: &Path) -> PathBuf {
        if self.database_path.is_absolute() {
            self.database_path.clone()
        } else {
            root.join(&self.database_path)
        }
    }
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            request_timeout_ms: default_request_timeout_ms(),
            limits: Limits::default(),
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_text_length: default_max_text_length(),
            max_drugs: default_max_drugs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_when_missing() {
        let temp = TempDir::new().unwrap();
        let config = ReviewConfig::load_or_default(temp.path()).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.limits.max_text_length, 4_000);
        assert_eq!(
            config.database_path_in(temp.path()),
            temp.path().join(".pmr/review.db")
        );
    }

    #[test]
    fn test_write_then_load() {
        let temp = TempDir::new().unwrap();
        let path = ReviewConfig::write_default(temp.path()).unwrap();
        assert!(path.exists());

        let config = ReviewConfig::load_or_default(temp.path()).unwrap();
        assert_eq!(config.request_timeout_ms, 5_000);
        assert_eq!(config.limits, Limits::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(PMR_DIR)).unwrap();
        std::fs::write(
            temp.path().join(PMR_DIR).join("config.toml"),
            "request_timeout_ms = 250\n\n[limits]\nmax_drugs = 4\n",
        )
        .unwrap();

        let config = ReviewConfig::load_or_default(temp.path()).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
        assert_eq!(config.limits.max_drugs, 4);
        assert_eq!(config.limits.max_text_length, 4_000);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join(PMR_DIR)).unwrap();
        std::fs::write(
            temp.path().join(PMR_DIR).join("config.toml"),
            "request_timeout_ms = 0\n",
        )
        .unwrap();

        assert!(ReviewConfig::load_or_default(temp.path()).is_err());
    }
}
