//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig)
//! - [`listen`]: WebSocket listener configuration (ListenConfig)
//! - [`auth`]: Credential verification settings (AuthConfig)
//! - [`persistence`]: Document store and flush scheduling (PersistenceConfig)
//! - [`limits`]: Queue capacities and protocol limits (LimitsConfig)
//! - [`validation`]: Startup checks

mod auth;
mod limits;
mod listen;
mod persistence;
mod types;
pub mod validation;

pub use auth::AuthConfig;
pub use limits::LimitsConfig;
pub use listen::ListenConfig;
pub use persistence::{PersistenceBackend, PersistenceConfig};
pub use types::{Config, ConfigError, ServerConfig};
