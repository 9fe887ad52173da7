//! Document store and flush scheduling configuration.

use serde::Deserialize;

/// Which [`DocumentStore`](crate::persistence::DocumentStore) to build.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceBackend {
    /// SQLite file at `path`.
    #[default]
    Sqlite,
    /// Process-local map. Nothing survives a restart.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default)]
    pub backend: PersistenceBackend,
    /// SQLite database path (default: "collabd.db").
    #[serde(default = "default_path")]
    pub path: String,
    /// Quiet period after the last edit before a snapshot is written (default: 1500ms).
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Write attempts per flush before the room is marked degraded (default: 5).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Create unknown documents on first join instead of rejecting them.
    /// Development only; in production documents are created by the metadata service.
    #[serde(default)]
    pub create_missing: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: PersistenceBackend::default(),
            path: default_path(),
            debounce_ms: default_debounce_ms(),
            max_attempts: default_max_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            create_missing: false,
        }
    }
}

fn default_path() -> String {
    "collabd.db".to_string()
}

fn default_debounce_ms() -> u64 {
    1500
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_initial_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_are_correct() {
        let config = PersistenceConfig::default();
        assert_eq!(config.backend, PersistenceBackend::Sqlite);
        assert_eq!(config.path, "collabd.db");
        assert_eq!(config.debounce_ms, 1500);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.backoff_initial_ms, 200);
        assert_eq!(config.backoff_max_ms, 5_000);
        assert!(!config.create_missing);
    }

    #[test]
    fn backend_deserialize_from_toml() {
        let cfg: PersistenceConfig = toml::from_str(r#"backend = "memory""#).unwrap();
        assert_eq!(cfg.backend, PersistenceBackend::Memory);
        assert!(toml::from_str::<PersistenceConfig>(r#"backend = "redis""#).is_err());
    }
}
