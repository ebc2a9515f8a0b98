//! Client Settings
//!
//! Where the client keeps its files and how often the background tasks
//! poll. Every field has a default, so an empty or missing settings file
//! is valid.
//!
//! ```toml
//! user_dir = "/home/me/.local/share/AzireVPN"
//! api_base = "https://api.azirevpn.com/v1/"
//! log_poll_ms = 300
//! transfer_poll_ms = 1000
//! ```

use azire_network::{DEFAULT_API_BASE, Url};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the per-user data directory
pub const APP_DIR_NAME: &str = "AzireVPN";

/// Tunnel configuration file name; its stem is the tunnel name
pub const CONFIG_FILE_NAME: &str = "AzireVPN.conf";
pub const LOG_FILE_NAME: &str = "log.bin";
pub const TOKEN_FILE_NAME: &str = "token.txt";
pub const KEYPAIR_FILE_NAME: &str = "keypair.txt";

/// Client settings (stored in an optional TOML file)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding token, keypair, tunnel config and log
    #[serde(default = "default_user_dir")]
    pub user_dir: PathBuf,
    /// REST API root, must end with `/`
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Log tailer polling interval
    #[serde(default = "default_log_poll_ms")]
    pub log_poll_ms: u64,
    /// Transfer poller interval between successful queries
    #[serde(default = "default_transfer_poll_ms")]
    pub transfer_poll_ms: u64,
    /// Backoff while the tunnel service is not listening
    #[serde(default = "default_transfer_poll_ms")]
    pub connect_retry_ms: u64,
    /// Upper bound on waiting for each background task at shutdown
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Whole-request HTTP timeout
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Override for `wg-quick` / `wireguard.exe`
    #[serde(default)]
    pub tunnel_program: Option<String>,
}

fn default_user_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_log_poll_ms() -> u64 {
    300
}

fn default_transfer_poll_ms() -> u64 {
    1000
}

fn default_shutdown_timeout_ms() -> u64 {
    2000
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_dir: default_user_dir(),
            api_base: default_api_base(),
            log_poll_ms: default_log_poll_ms(),
            transfer_poll_ms: default_transfer_poll_ms(),
            connect_retry_ms: default_transfer_poll_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            http_timeout_secs: default_http_timeout_secs(),
            tunnel_program: None,
        }
    }
}

impl Settings {
    /// Defaults rooted at `user_dir`
    pub fn with_user_dir(user_dir: impl Into<PathBuf>) -> Self {
        Self {
            user_dir: user_dir.into(),
            ..Self::default()
        }
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        toml::from_str(content)
            .map_err(|e| SettingsError::ParseError(e.to_string()))
    }

    /// Load from a TOML file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(SettingsError::IoError(e.to_string())),
        }
    }

    /// Parsed API root
    pub fn api_url(&self) -> Result<Url, SettingsError> {
        let url = Url::parse(&self.api_base)
            .map_err(|e| SettingsError::InvalidApiBase(e.to_string()))?;
        if !url.path().ends_with('/') {
            return Err(SettingsError::InvalidApiBase(format!("{} must end with '/'", url)));
        }
        Ok(url)
    }

    pub fn config_file(&self) -> PathBuf {
        self.user_dir.join(CONFIG_FILE_NAME)
    }

    pub fn log_file(&self) -> PathBuf {
        self.user_dir.join(LOG_FILE_NAME)
    }

    pub fn token_file(&self) -> PathBuf {
        self.user_dir.join(TOKEN_FILE_NAME)
    }

    pub fn keypair_file(&self) -> PathBuf {
        self.user_dir.join(KEYPAIR_FILE_NAME)
    }

    pub fn log_poll_interval(&self) -> Duration {
        Duration::from_millis(self.log_poll_ms)
    }

    pub fn transfer_poll_interval(&self) -> Duration {
        Duration::from_millis(self.transfer_poll_ms)
    }

    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid API base URL: {0}")]
    InvalidApiBase(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_defaults() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.log_poll_interval(), Duration::from_millis(300));
        assert_eq!(settings.transfer_poll_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_partial_override() {
        let settings = Settings::from_toml(
            "user_dir = \"/tmp/azire\"\nlog_poll_ms = 50\ntunnel_program = \"/usr/bin/wg-quick\"\n",
        ).unwrap();

        assert_eq!(settings.log_poll_ms, 50);
        assert_eq!(settings.config_file(), PathBuf::from("/tmp/azire/AzireVPN.conf"));
        assert_eq!(settings.token_file(), PathBuf::from("/tmp/azire/token.txt"));
        assert_eq!(settings.tunnel_program.as_deref(), Some("/usr/bin/wg-quick"));
        assert_eq!(settings.transfer_poll_ms, 1000);
    }

    #[test]
    fn test_missing_file_is_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings.api_base, DEFAULT_API_BASE);
    }

    #[test]
    fn test_api_base_needs_trailing_slash() {
        let mut settings = Settings::default();
        assert!(settings.api_url().is_ok());

        settings.api_base = "https://api.azirevpn.com/v1".into();
        assert!(matches!(settings.api_url(), Err(SettingsError::InvalidApiBase(_))));
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(Settings::from_toml("log_poll_ms = \"fast\""), Err(SettingsError::ParseError(_))));
    }
}
