//! Configuration loading for relay-server.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).

use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration for relay-server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Artifact storage configuration.
    pub storage: StorageConfig,
    /// Message routing configuration.
    pub routing: RoutingConfig,
    /// Rate limiting configuration.
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    pub http: HttpConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the TLS listener (default: 0.0.0.0:5000).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// PEM certificate chain presented to clients.
    #[serde(default = "default_cert_path")]
    pub cert_path: PathBuf,
    /// PEM private key matching the certificate.
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
    /// Seconds a client gets to complete the TLS handshake (default: 10).
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
}

/// Artifact storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Directory broadcast files are written to (default: received_files).
    #[serde(default = "default_storage_directory")]
    pub directory: PathBuf,
    /// Marker prepended to stored file names (default: receive).
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

/// Message routing configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoutingConfig {
    /// Leave the sending session out of its own broadcasts (default: false).
    #[serde(default)]
    pub exclude_sender: bool,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Connection attempts allowed per address per minute (default: 30).
    #[serde(default = "default_connections_per_ip")]
    pub connections_per_ip: u32,
    /// Messages allowed per address per minute. Unlimited when absent.
    /// PING is never counted.
    #[serde(default)]
    pub messages_per_minute: Option<u32>,
    /// Maximum concurrent sessions (default: 1000).
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,
    /// Maximum record size in bytes. Unbounded when absent.
    #[serde(default)]
    pub max_message_size: Option<usize>,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Serve /health and /metrics (default: true).
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    /// Bind address for HTTP server (default: 127.0.0.1:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_cert_path() -> PathBuf {
    PathBuf::from("certs/server.crt")
}

fn default_key_path() -> PathBuf {
    PathBuf::from("certs/server.key")
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_storage_directory() -> PathBuf {
    PathBuf::from("received_files")
}

fn default_file_prefix() -> String {
    "receive".to_string()
}

fn default_connections_per_ip() -> u32 {
    30
}

fn default_max_concurrent_sessions() -> usize {
    1000
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_address: default_bind_address(),
                cert_path: default_cert_path(),
                key_path: default_key_path(),
                handshake_timeout_secs: default_handshake_timeout_secs(),
            },
            storage: StorageConfig {
                directory: default_storage_directory(),
                file_prefix: default_file_prefix(),
            },
            routing: RoutingConfig::default(),
            limits: LimitsConfig {
                connections_per_ip: default_connections_per_ip(),
                messages_per_minute: None,
                max_concurrent_sessions: default_max_concurrent_sessions(),
                max_message_size: None,
            },
            http: HttpConfig {
                enabled: default_http_enabled(),
                bind_address: default_http_bind(),
            },
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the relay cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if limits.connections_per_ip == 0 {
            return Err(ConfigError::Invalid("limits.connections_per_ip must be > 0"));
        }
        if limits.messages_per_minute == Some(0) {
            return Err(ConfigError::Invalid("limits.messages_per_minute must be > 0"));
        }
        if limits.max_concurrent_sessions == 0 {
            return Err(ConfigError::Invalid(
                "limits.max_concurrent_sessions must be > 0",
            ));
        }
        if limits.max_message_size == Some(0) {
            return Err(ConfigError::Invalid("limits.max_message_size must be > 0"));
        }
        if self.storage.file_prefix.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(
                "storage.file_prefix must not contain path separators",
            ));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A setting is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(&'static str),
}
