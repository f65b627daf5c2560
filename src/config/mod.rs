//! Configuration management for keepsake
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable overriding the base directory
pub const HOME_ENV: &str = "KEEPSAKE_HOME";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Index and attachment storage
    #[serde(default)]
    pub store: StoreConfig,

    /// Fallback image resolution
    #[serde(default)]
    pub fallback: FallbackConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Index file name, relative to the base directory
    #[serde(default = "default_index_file")]
    pub index_file: String,

    /// Attachments folder name, relative to the base directory
    #[serde(default = "default_attachments_dir")]
    pub attachments_dir: String,

    /// JPEG quality for re-encoded images
    #[serde(default = "default_image_quality")]
    pub image_quality: u8,

    /// Extension used for audio sources without one
    #[serde(default = "default_audio_extension")]
    pub default_audio_extension: String,
}

/// Fallback image configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Upper bound for obtaining a fallback image (seconds)
    #[serde(default = "default_fallback_timeout")]
    pub timeout_secs: u64,

    /// User agent string for downloads
    #[serde(default = "default_fallback_user_agent")]
    pub user_agent: String,

    /// Folder holding bundled assets referenced by name
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for keepsake data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to the JSON index
    pub index_file: PathBuf,

    /// Path to the attachments folder
    pub attachments_dir: PathBuf,

    /// Path to the bundled assets folder
    pub assets_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            index_file: default_index_file(),
            attachments_dir: default_attachments_dir(),
            image_quality: default_image_quality(),
            default_audio_extension: default_audio_extension(),
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fallback_timeout(),
            user_agent: default_fallback_user_agent(),
            assets_dir: default_assets_dir(),
        }
    }
}

impl FallbackConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Get the default base directory ($KEEPSAKE_HOME or ~/.keepsake)
    pub fn default_base_dir() -> PathBuf {
        if let Ok(home) = std::env::var(HOME_ENV) {
            if !home.trim().is_empty() {
                return PathBuf::from(home);
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".keepsake")
    }

    /// Build an in-memory configuration rooted at `base_dir` (no file read)
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let mut config = Config::default();
        config.init_paths(Some(base_dir.into()));
        config
    }

    /// Initialize paths configuration
    fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig {
            config_file: base.join("config.toml"),
            index_file: base.join(&self.store.index_file),
            attachments_dir: base.join(&self.store.attachments_dir),
            assets_dir: base.join(&self.fallback.assets_dir),
            base_dir: base,
        };
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            let base = config.paths.base_dir.clone();
            loaded.init_paths(Some(base));
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if keepsake is initialized (config file exists)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.store.image_quality == 0 || self.store.image_quality > 100 {
            return Err(Error::Config(
                "store.image_quality must be between 1 and 100".to_string(),
            ));
        }

        for (key, value) in [
            ("store.index_file", &self.store.index_file),
            ("store.attachments_dir", &self.store.attachments_dir),
            ("fallback.assets_dir", &self.fallback.assets_dir),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", key)));
            }
        }

        if self.store.index_file == self.store.attachments_dir {
            return Err(Error::Config(
                "store.index_file and store.attachments_dir must differ".to_string(),
            ));
        }

        if self.store.default_audio_extension.is_empty()
            || self.store.default_audio_extension.contains(['.', '/', '\\'])
        {
            return Err(Error::Config(
                "store.default_audio_extension must be a bare extension like 'm4a'".to_string(),
            ));
        }

        if self.fallback.timeout_secs == 0 {
            return Err(Error::Config(
                "fallback.timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.index_file, "memories.json");
        assert_eq!(config.store.attachments_dir, "attachments");
        assert_eq!(config.store.image_quality, 85);
        assert_eq!(config.fallback.timeout(), Duration::from_secs(20));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_paths_follow_base_dir() {
        let config = Config::with_base_dir("/data/keepsake");
        assert_eq!(
            config.paths.index_file,
            PathBuf::from("/data/keepsake/memories.json")
        );
        assert_eq!(
            config.paths.attachments_dir,
            PathBuf::from("/data/keepsake/attachments")
        );
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::with_base_dir(tmp.path());
        config.store.image_quality = 70;
        config.fallback.timeout_secs = 5;

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.store.image_quality, 70);
        assert_eq!(loaded.fallback.timeout_secs, 5);
        assert_eq!(loaded.paths.index_file, tmp.path().join("memories.json"));

    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[store]\nattachments_dir = \"files\"\n",
        )
        .unwrap();

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.paths.attachments_dir, tmp.path().join("files"));
        assert_eq!(loaded.store.image_quality, 85);
        assert_eq!(loaded.fallback.timeout_secs, 20);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.store.image_quality = 0;
        assert!(config.validate().is_err());
        config.store.image_quality = 101;
        assert!(config.validate().is_err());
        config.store.image_quality = 90;
        assert!(config.validate().is_ok());

        config.store.default_audio_extension = ".m4a".to_string();
        assert!(config.validate().is_err());
        config.store.default_audio_extension = "wav".to_string();

        config.store.attachments_dir = config.store.index_file.clone();
        assert!(config.validate().is_err());
        config.store.attachments_dir = "attachments".to_string();

        config.fallback.timeout_secs = 0;
        assert!(config.validate().is_err());
    }
}
