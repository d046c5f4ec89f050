use serde::Deserialize;
use std::time::Duration;

/// Connection settings for the Trapper server API
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the Trapper server (e.g. "https://trapper.example.org")
    #[serde(default)]
    pub host: String,
    /// Account login (an e-mail address)
    #[serde(default)]
    pub login: String,
    /// Account password
    #[serde(default)]
    pub password: String,
    /// Verify the server's TLS certificate
    #[serde(default = "default_true")]
    pub verify_ssl: bool,
    /// Request timeout in seconds (0 disables the timeout)
    #[serde(default)]
    pub request_timeout_secs: u64,
    /// Numeric id of the active research project, if already resolved
    #[serde(default)]
    pub project_id: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            login: String::new(),
            password: String::new(),
            verify_ssl: default_true(),
            request_timeout_secs: 0,
            project_id: None,
        }
    }
}

impl RemoteConfig {
    /// Get the request timeout, if one is configured
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// Account name without the mail domain, used to tag packages and as the
    /// default FTP login
    pub fn short_login(&self) -> &str {
        self.login.split('@').next().unwrap_or_default()
    }

    /// Host name with the URL scheme stripped
    pub fn bare_host(&self) -> &str {
        match self.host.split_once("//") {
            Some((_, rest)) => rest.trim_end_matches('/'),
            None => self.host.trim_end_matches('/'),
        }
    }
}
