//! Server configuration loaded from TOML.
//!
//! ```toml
//! [listener]
//! host = "127.0.0.1"
//! port = 8443
//! threads = 8
//!
//! [tls]
//! enabled = true
//! cert_file = "certs/server.pem"
//! key_file = "certs/server.key"
//! min_version = "1.3"
//!
//! [cors]
//! enabled = true
//! allowed_origins = ["https://app.example.com"]
//! allowed_methods = ["GET", "POST"]
//!
//! [session]
//! enabled = true
//! max_age_secs = 1800
//! ```
//!
//! Every section and key is optional; missing values take the defaults
//! below. [`Config::default()`] is a valid plain-HTTP configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::middleware::CorsConfig;
use crate::tls::TlsSettings;

/// Default cap on a single buffered request (8 MiB).
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

/// Errors produced while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {}", .0.join("; "))]
    Validation(Vec<String>),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub listener: ListenerConfig,
    pub tls: TlsSettings,
    pub cors: CorsConfig,
    pub session: SessionConfig,
}

/// The `[listener]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    /// Runtime worker threads used by [`HttpServer::start`](crate::HttpServer::start).
    pub threads: usize,
    /// A connection whose unfinished request outgrows this is answered with
    /// 413 and closed.
    pub max_request_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8080,
            threads: 4,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

impl ListenerConfig {
    /// Returns `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The `[session]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub enabled: bool,
    pub max_age_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_age_secs: 3600,
        }
    }
}

impl SessionConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl Config {
    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, is not valid TOML
    /// for this schema, or fails [`validate`](Self::validate).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] or [`ConfigError::Validation`].
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints, reporting every violation at once.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] listing each problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.listener.host.trim().is_empty() {
            problems.push("listener.host must not be empty".to_owned());
        }
        if self.listener.threads == 0 {
            problems.push("listener.threads must be at least 1".to_owned());
        }
        if self.listener.max_request_bytes == 0 {
            problems.push("listener.max_request_bytes must be greater than 0".to_owned());
        }
        if self.tls.enabled {
            if self.tls.cert_file.as_os_str().is_empty() {
                problems.push("tls.cert_file is required when tls.enabled = true".to_owned());
            }
            if self.tls.key_file.as_os_str().is_empty() {
                problems.push("tls.key_file is required when tls.enabled = true".to_owned());
            }
        }
        if self.session.enabled && self.session.max_age_secs == 0 {
            problems.push("session.max_age_secs must be greater than 0".to_owned());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(problems))
        }
    }
}
