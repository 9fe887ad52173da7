//! Network listener configuration.

use serde::Deserialize;
use std::net::SocketAddr;

/// WebSocket listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind to (e.g., "0.0.0.0:4000").
    pub address: SocketAddr,
    /// Allowed origins for CORS (e.g., `["https://app.example.com"]`).
    /// Empty list allows all origins.
    #[serde(default)]
    pub allow_origins: Vec<String>,
    /// Largest accepted WebSocket message in bytes (default: 4 MiB).
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
}

fn default_max_message_bytes() -> usize {
    4 * 1024 * 1024
}
