//! Configuration for modelhub.
//!
//! Loaded from a TOML file with `[cache]`, `[models]` and `[logging]`
//! sections. Every field has a default, and a missing file means "all
//! defaults".

use modelhub_models::CacheConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Result, ServeError};

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "modelhub.toml";

/// Environment variable overriding the config file path.
pub const CONFIG_PATH_ENV: &str = "MODELHUB_CONFIG";

/// Where model files live and which uploads are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelsConfig {
    /// Directory model folders are resolved against.
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Folder for classification models.
    #[serde(default = "default_cls_folder")]
    pub cls_folder: String,
    /// Folder for detection models.
    #[serde(default = "default_detect_folder")]
    pub detect_folder: String,
    /// Folder for models of any other type.
    #[serde(default = "default_folder")]
    pub default_folder: String,
    /// Accepted upload extensions, lowercase, without the dot.
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_cls_folder() -> String {
    "models/cls".to_string()
}

fn default_detect_folder() -> String {
    "models/detect".to_string()
}

fn default_folder() -> String {
    "models".to_string()
}

fn default_allowed_extensions() -> Vec<String> {
    ["jpg", "png", "pt"].into_iter().map(String::from).collect()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            cls_folder: default_cls_folder(),
            detect_folder: default_detect_folder(),
            default_folder: default_folder(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

/// Tracing output settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    #[serde(default = "default_filter")]
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_filter() -> String {
    "modelhub=info,warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

/// Root configuration for modelhub.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Model cache and evictor settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Model file locations.
    #[serde(default)]
    pub models: ModelsConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from `$MODELHUB_CONFIG`, or `modelhub.toml` in the
    /// working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or validated.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from);
        Self::load_from(&path)
    }

    /// Load configuration from a specific file. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read, parsed or validated.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse and validate configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML or fails validation.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all sections.
    ///
    /// # Errors
    ///
    /// Returns `ServeError::Config` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        if self.models.allowed_extensions.is_empty() {
            return Err(ServeError::Config("models.allowed_extensions must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.cache, CacheConfig::default());
        assert_eq!(config.models.root, PathBuf::from("."));
        assert_eq!(config.models.cls_folder, "models/cls");
        assert_eq!(config.models.allowed_extensions, vec!["jpg", "png", "pt"]);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_load_from_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let config = Config::load_from(&temp.path().join("modelhub.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("modelhub.toml");
        std::fs::write(
            &path,
            r#"
[cache]
max_age_secs = 3600
sweep_interval_secs = 1800

[models]
root = "/srv/modelhub"

[logging]
json = true
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.cache.max_age_secs, 3600);
        assert_eq!(config.cache.sweep_interval_secs, 1800);
        assert_eq!(config.cache.sweep_min_interval_secs, 300);
        assert_eq!(config.models.root, PathBuf::from("/srv/modelhub"));
        assert_eq!(config.models.detect_folder, "models/detect");
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_cache_section_rejected() {
        let err = Config::from_toml_str("[cache]\nload_timeout_secs = 0\n").unwrap_err();
        assert!(matches!(err, ServeError::Config(_)));
    }

    #[test]
    fn test_empty_extensions_rejected() {
        let err = Config::from_toml_str("[models]\nallowed_extensions = []\n").unwrap_err();
        assert!(matches!(err, ServeError::Config(_)));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = Config::from_toml_str("[cache\n").unwrap_err();
        assert!(matches!(err, ServeError::Toml(_)));
    }
}
