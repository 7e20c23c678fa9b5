//! Configuration types for the pserve download server

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PserveConfig {
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared-secret access control
    #[serde(default)]
    pub auth: AuthConfig,

    /// File serving settings
    #[serde(default)]
    pub files: FilesConfig,

    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Server listening configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable per-request access logging
    #[serde(default = "default_true")]
    pub access_log: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            access_log: true,
        }
    }
}

/// Shared-secret authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Header carrying the token
    #[serde(default = "default_auth_header")]
    pub header: String,

    /// The shared secret; requests must match it exactly
    #[serde(default)]
    pub token: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            header: default_auth_header(),
            token: String::new(),
        }
    }
}

/// File serving configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Document root; every served file must live under this directory
    #[serde(default = "default_root")]
    pub root: String,

    /// Maximum bytes per response chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            chunk_size: default_chunk_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LogConfig {
    /// Directory for rotated log files; console-only when unset
    #[serde(default)]
    pub directory: Option<String>,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_true() -> bool {
    true
}

fn default_auth_header() -> String {
    "X-Auth-Token".to_string()
}

fn default_root() -> String {
    "/srv/pserve".to_string()
}

fn default_chunk_size() -> usize {
    64 * 1024
}

impl PserveConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Reject configurations the server cannot safely run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.token.is_empty() {
            return Err(ConfigError::ValidationError(
                "auth.token must not be empty".to_string(),
            ));
        }
        if self.files.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "files.chunk_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
