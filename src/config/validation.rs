//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::{Config, PersistenceBackend};
use std::path::Path;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.name is required")]
    MissingServerName,
    #[error("auth.jwt_secret is required (or set COLLABD_JWT_SECRET)")]
    MissingJwtSecret,
    #[error("auth.handshake_timeout_ms must be greater than zero")]
    ZeroHandshakeTimeout,
    #[error("listen.max_message_bytes must be greater than zero")]
    ZeroMessageSize,
    #[error("limits.{0} must be greater than zero")]
    ZeroLimit(&'static str),
    #[error("persistence.max_attempts must be at least 1")]
    ZeroAttempts,
    #[error("persistence.backoff_initial_ms ({0}) exceeds backoff_max_ms ({1})")]
    BackoffInverted(u64, u64),
    #[error("persistence.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() {
        errors.push(ValidationError::MissingServerName);
    }
    if config.auth.jwt_secret.is_empty() {
        errors.push(ValidationError::MissingJwtSecret);
    }
    if config.auth.handshake_timeout_ms == 0 {
        errors.push(ValidationError::ZeroHandshakeTimeout);
    }
    if config.listen.max_message_bytes == 0 {
        errors.push(ValidationError::ZeroMessageSize);
    }

    let limits = &config.limits;
    for (name, value) in [
        ("room_mailbox_capacity", limits.room_mailbox_capacity),
        ("client_queue_capacity", limits.client_queue_capacity),
        ("max_documents_per_connection", limits.max_documents_per_connection),
        ("max_awareness_bytes", limits.max_awareness_bytes),
    ] {
        if value == 0 {
            errors.push(ValidationError::ZeroLimit(name));
        }
    }
    if limits.sync_timeout_ms == 0 {
        errors.push(ValidationError::ZeroLimit("sync_timeout_ms"));
    }

    let persistence = &config.persistence;
    if persistence.max_attempts == 0 {
        errors.push(ValidationError::ZeroAttempts);
    }
    if persistence.backoff_initial_ms > persistence.backoff_max_ms {
        errors.push(ValidationError::BackoffInverted(
            persistence.backoff_initial_ms,
            persistence.backoff_max_ms,
        ));
    }
    if persistence.backend == PersistenceBackend::Sqlite && persistence.path != ":memory:" {
        let db_path = Path::new(&persistence.path);
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            errors.push(ValidationError::DatabasePathInvalid(persistence.path.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
