//! Connection admission.
//!
//! The [`Gatekeeper`] turns a credential into an [`Identity`] before any
//! room state is touched. Credentials are looked for, in order, in the
//! upgrade URL (`?token=`), the `Authorization: Bearer` header, and finally
//! an in-band `auth` frame (handled by the session, bounded by
//! [`Gatekeeper::handshake_timeout`]).

use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod jwt;

pub use jwt::{JwtVerifier, is_insecure_secret};

use crate::config::AuthConfig;

/// Who is on the other end of a connection. Fixed for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

/// Authentication failures. All of them are connection-fatal.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential supplied")]
    MissingToken,
    #[error("malformed token: {0}")]
    Malformed(&'static str),
    #[error("unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("token issuer rejected")]
    WrongIssuer,
    #[error("token has no user id")]
    MissingSubject,
    #[error("authentication timed out")]
    HandshakeTimeout,
}

impl AuthError {
    /// Short label for metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::Malformed(_) => "malformed",
            Self::UnsupportedAlgorithm(_) => "unsupported_alg",
            Self::BadSignature => "bad_signature",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::WrongIssuer => "wrong_issuer",
            Self::MissingSubject => "missing_subject",
            Self::HandshakeTimeout => "timeout",
        }
    }
}

/// Offline credential check.
pub trait CredentialValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Admission policy shared by every connection.
#[derive(Clone)]
pub struct Gatekeeper {
    validator: Arc<dyn CredentialValidator>,
    handshake_timeout: Duration,
}

impl Gatekeeper {
    pub fn new(validator: Arc<dyn CredentialValidator>, handshake_timeout: Duration) -> Self {
        Self {
            validator,
            handshake_timeout,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            Arc::new(JwtVerifier::from_config(config)),
            Duration::from_millis(config.handshake_timeout_ms),
        )
    }

    /// Deadline for the in-band `auth` frame.
    pub fn handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Validate a credential.
    pub fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.validator.validate(token)
    }
}

/// Credential carried on the upgrade request, if any.
pub fn token_from_request(query: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.and_then(token_from_query) {
        return Some(token);
    }
    headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            let (scheme, rest) = v.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| rest.trim().to_string())
        })
        .filter(|t| !t.is_empty())
}

fn token_from_query(query: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "token")
        .map(|(_, value)| value.to_string())
        .filter(|t| !t.is_empty())
}
