//! Configuration management for the upload tool.
//!
//! Configuration is loaded in the following order (later sources override earlier):
//! 1. Built-in defaults
//! 2. `config/uploader.{toml,yaml,json}` if present
//! 3. An explicit file passed on the command line
//! 4. Environment variables prefixed with `UPLOADER__` (e.g. `UPLOADER__FTP__PASSIVE=false`)
//!
//! FTP credentials left empty are derived from the Trapper account settings.

use crate::ftp_session::FtpEndpoint;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use trapper_remote::RemoteConfig;

/// Control connection port used when none (or an invalid one) is configured
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Main configuration for the upload tool.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploaderConfig {
    /// FTP server settings
    #[serde(default)]
    pub ftp: FtpConfig,

    /// Trapper server settings
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Upload behaviour
    #[serde(default)]
    pub upload: UploadSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// FTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FtpConfig {
    /// Server as "host" or "host:port"; defaults to the Trapper host
    #[serde(default)]
    pub host: String,

    /// Defaults to the Trapper login without its mail domain
    #[serde(default)]
    pub login: String,

    /// Defaults to the Trapper password
    #[serde(default)]
    pub password: String,

    /// Use passive mode for data connections
    #[serde(default = "default_true")]
    pub passive: bool,

    /// Use explicit FTPS
    #[serde(default = "default_true")]
    pub tls: bool,

    /// Verify the FTPS server certificate; defaults to `remote.verify_ssl`
    #[serde(default)]
    pub verify_tls: Option<bool>,

    /// Remote directory receiving the packages
    #[serde(default = "default_remote_dir")]
    pub remote_dir: String,

    /// Bytes sent per block
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

/// Upload behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadSettings {
    /// Ask Trapper to process the package once it is uploaded
    #[serde(default = "default_true")]
    pub trigger_processing: bool,

    /// Ask Trapper to delete the archive after processing
    #[serde(default)]
    pub remove_zip: bool,

    /// Capacity of the progress event channel
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
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
fn default_true() -> bool {
    true
}
fn default_remote_dir() -> String {
    "/collections".to_string()
}
fn default_block_size() -> usize {
    8192
}
fn default_progress_buffer() -> usize {
    256
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            login: String::new(),
            password: String::new(),
            passive: default_true(),
            tls: default_true(),
            verify_tls: None,
            remote_dir: default_remote_dir(),
            block_size: default_block_size(),
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            trigger_processing: default_true(),
            remove_zip: false,
            progress_buffer: default_progress_buffer(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl UploaderConfig {
    /// Load configuration from files and environment variables.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .add_source(File::with_name("config/uploader").required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix("UPLOADER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let endpoint = self.endpoint();

        if endpoint.host.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "ftp.host (or remote.host)".to_string(),
            ));
        }

        if endpoint.login.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "ftp.login (or remote.login)".to_string(),
            ));
        }

        if self.ftp.block_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "ftp.block_size".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if !self.ftp.remote_dir.starts_with('/') {
            return Err(ConfigValidationError::InvalidValue {
                field: "ftp.remote_dir".to_string(),
                message: "must be an absolute path".to_string(),
            });
        }

        if self.upload.progress_buffer == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "upload.progress_buffer".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }

    /// Whether FTPS checks the server certificate
    pub fn verify_tls(&self) -> bool {
        self.ftp.verify_tls.unwrap_or(self.remote.verify_ssl)
    }

    /// FTP server and credentials, falling back to the Trapper account
    pub fn endpoint(&self) -> FtpEndpoint {
        let server = if self.ftp.host.is_empty() {
            self.remote.bare_host()
        } else {
            self.ftp.host.as_str()
        };
        let (host, port) = split_host_port(server);

        let login = if self.ftp.login.is_empty() {
            self.remote.short_login()
        } else {
            self.ftp.login.as_str()
        };

        let password = if self.ftp.password.is_empty() {
            self.remote.password.as_str()
        } else {
            self.ftp.password.as_str()
        };

        FtpEndpoint {
            host: host.to_string(),
            port,
            login: login.to_string(),
            password: password.to_string(),
            passive: self.ftp.passive,
            tls: self.ftp.tls,
        }
    }
}

/// Split "host:port"; anything else is a bare host on the default port
fn split_host_port(server: &str) -> (&str, u16) {
    let parts: Vec<&str> = server.split(':').collect();
    match parts.as_slice() {
        [host, port] => (*host, port.parse().unwrap_or(DEFAULT_FTP_PORT)),
        _ => (server, DEFAULT_FTP_PORT),
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

    fn create_test_config() -> UploaderConfig {
        UploaderConfig {
            remote: RemoteConfig {
                host: "https://trapper.example.org".to_string(),
                login: "jane@example.org".to_string(),
                password: "secret".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = UploaderConfig::default();
        assert!(config.ftp.passive);
        assert!(config.ftp.tls);
        assert_eq!(config.ftp.remote_dir, "/collections");
        assert_eq!(config.ftp.block_size, 8192);
        assert!(config.upload.trigger_processing);
        assert!(!config.upload.remove_zip);
    }

    #[test]
    fn test_credentials_derived_from_remote() {
        let endpoint = create_test_config().endpoint();
        assert_eq!(endpoint.host, "trapper.example.org");
        assert_eq!(endpoint.port, 21);
        assert_eq!(endpoint.login, "jane");
        assert_eq!(endpoint.password, "secret");
    }

    #[test]
    fn test_explicit_credentials_win() {
        let mut config = create_test_config();
        config.ftp.host = "ftp.example.org:2121".to_string();
        config.ftp.login = "uploader".to_string();
        config.ftp.password = "other".to_string();

        let endpoint = config.endpoint();
        assert_eq!(endpoint.host, "ftp.example.org");
        assert_eq!(endpoint.port, 2121);
        assert_eq!(endpoint.login, "uploader");
        assert_eq!(endpoint.password, "other");
    }

    #[test]
    fn test_verify_tls_follows_remote_setting() {
        let mut config = create_test_config();
        assert!(config.verify_tls());

        config.remote.verify_ssl = false;
        assert!(!config.verify_tls());

        config.ftp.verify_tls = Some(true);
        assert!(config.verify_tls());
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("ftp.example.org"), ("ftp.example.org", 21));
        assert_eq!(split_host_port("ftp.example.org:990"), ("ftp.example.org", 990));
        assert_eq!(split_host_port("ftp.example.org:abc"), ("ftp.example.org", 21));
    }

    #[test]
    fn test_validation() {
        assert!(create_test_config().validate().is_ok());

        assert!(matches!(
            UploaderConfig::default().validate(),
            Err(ConfigValidationError::MissingField(_))
        ));

        let mut config = create_test_config();
        config.ftp.block_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }
}
