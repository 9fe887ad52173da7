//! Credential verification configuration.

use serde::Deserialize;

/// Settings for offline HS256 token verification.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared HMAC secret. Overridden by `COLLABD_JWT_SECRET` when set.
    #[serde(default)]
    pub jwt_secret: String,
    /// Clock skew tolerated on `exp`/`nbf`, in seconds (default: 30).
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,
    /// How long an unauthenticated socket may wait before sending `auth` (default: 10s).
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Required `iss` claim, if any.
    #[serde(default)]
    pub issuer: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            leeway_secs: default_leeway_secs(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            issuer: None,
        }
    }
}

fn default_leeway_secs() -> u64 {
    30
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}
