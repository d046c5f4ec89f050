//! Configuration management for the packaging tool.
//!
//! Configuration is loaded in the following order (later sources override earlier):
//! 1. Built-in defaults
//! 2. `config/packager.{toml,yaml,json}` if present
//! 3. An explicit file passed on the command line
//! 4. Environment variables prefixed with `PACKAGER__` (e.g. `PACKAGER__TIMEZONE__NAME`)

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use trapper_remote::RemoteConfig;

/// Main configuration for the packaging tool.
#[derive(Debug, Clone, Deserialize)]
pub struct PackagerConfig {
    /// What to package and where to write it
    pub package: PackageSettings,

    /// Time zone policy for capture timestamps
    pub timezone: TimezoneConfig,

    /// Archive settings
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Trapper server settings (used for validation and naming)
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Input tree, selection and output naming.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageSettings {
    /// Media root holding one directory per collection
    #[serde(default)]
    pub media_root: PathBuf,

    /// Directory receiving the manifest, archive and log
    #[serde(default)]
    pub output_path: PathBuf,

    /// Collections (directory names under the media root) to package
    #[serde(default)]
    pub collections: Vec<String>,

    /// Research project acronym
    #[serde(default)]
    pub project: String,

    /// Name tagging the package; defaults to the Trapper login without its domain
    #[serde(default)]
    pub username: Option<String>,

    /// Optional prefix prepended to every package file name
    #[serde(default)]
    pub name_prefix: String,

    /// Recognised image extensions (with leading dot)
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Recognised video extensions (with leading dot)
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
}

/// Time zone policy.
#[derive(Debug, Clone, Deserialize)]
pub struct TimezoneConfig {
    /// IANA zone identifier, e.g. "Europe/Warsaw"
    pub name: String,

    /// Read every timestamp with the zone's standard offset
    #[serde(default)]
    pub ignore_dst: bool,
}

/// Archive compression method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Stored,
    #[default]
    Deflated,
}

/// Archive settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArchiveConfig {
    #[serde(default)]
    pub compression: Compression,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_image_extensions() -> Vec<String> {
    [".jpg", ".jpeg", ".png", ".gif"].map(String::from).to_vec()
}
fn default_video_extensions() -> Vec<String> {
    [".avi", ".mp4", ".webm", ".m4v"].map(String::from).to_vec()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl PackagerConfig {
    /// Load configuration from files and environment variables.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::with_name("config/packager").required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("PACKAGER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("package.collections")
                    .with_list_parse_key("package.image_extensions")
                    .with_list_parse_key("package.video_extensions")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate settings that do not need the file system.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.package.project.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "package.project".to_string(),
            ));
        }

        if self.username().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "package.username".to_string(),
            ));
        }

        if self.timezone.name.trim().is_empty() {
            return Err(ConfigValidationError::MissingField(
                "timezone.name".to_string(),
            ));
        }

        if let Some(ext) = self
            .package
            .image_extensions
            .iter()
            .chain(&self.package.video_extensions)
            .find(|ext| !ext.starts_with('.'))
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "package.image_extensions/video_extensions".to_string(),
                message: format!("extension '{}' must start with a dot", ext),
            });
        }

        Ok(())
    }

    /// Username tagging the package
    pub fn username(&self) -> String {
        match &self.package.username {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => self.remote.short_login().to_string(),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> PackagerConfig {
        PackagerConfig {
            package: PackageSettings {
                media_root: PathBuf::from("/data/media"),
                output_path: PathBuf::from("/data/out"),
                collections: vec!["siteA".to_string()],
                project: "WOLF".to_string(),
                username: None,
                name_prefix: String::new(),
                image_extensions: default_image_extensions(),
                video_extensions: default_video_extensions(),
            },
            timezone: TimezoneConfig {
                name: "Europe/Warsaw".to_string(),
                ignore_dst: false,
            },
            archive: ArchiveConfig::default(),
            remote: RemoteConfig {
                login: "jane@example.org".to_string(),
                ..Default::default()
            },
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = create_test_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_username_falls_back_to_login() {
        let mut config = create_test_config();
        assert_eq!(config.username(), "jane");

        config.package.username = Some("field-team".to_string());
        assert_eq!(config.username(), "field-team");
    }

    #[test]
    fn test_missing_project() {
        let mut config = create_test_config();
        config.package.project = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_extension_without_dot() {
        let mut config = create_test_config();
        config.package.video_extensions = vec!["mp4".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_default_extensions() {
        assert_eq!(default_image_extensions().len(), 4);
        assert!(default_video_extensions().contains(&".m4v".to_string()));
    }
}
