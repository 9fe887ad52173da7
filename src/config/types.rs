//! Core configuration types and loading.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use super::auth::AuthConfig;
use super::limits::LimitsConfig;
use super::listen::ListenConfig;
use super::persistence::PersistenceConfig;

/// Environment variable that overrides `auth.jwt_secret`.
pub const JWT_SECRET_ENV: &str = "COLLABD_JWT_SECRET";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity and HTTP endpoint.
    #[serde(default)]
    pub server: ServerConfig,
    /// WebSocket listener.
    pub listen: ListenConfig,
    /// Credential verification.
    #[serde(default)]
    pub auth: AuthConfig,
    /// Document store and flush scheduling.
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Queue capacities and protocol limits.
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        if let Ok(secret) = std::env::var(JWT_SECRET_ENV)
            && !secret.is_empty()
        {
            config.auth.jwt_secret = secret;
        }
        Ok(config)
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Service name reported by `/health` and in logs.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Health + Prometheus HTTP port (default: 9090). `0` disables the endpoint.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            http_port: default_http_port(),
        }
    }
}

fn default_server_name() -> String {
    "collabd".to_string()
}

fn default_http_port() -> u16 {
    9090
}
