//! Offline HS256 JSON Web Token verification.
//!
//! Only the compact serialization with `alg: HS256` is accepted. The
//! signature is checked in constant time before any claim is trusted.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use super::{AuthError, CredentialValidator, Identity};
use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

/// Secrets that shipped as fallbacks in older deployments.
const KNOWN_WEAK_SECRETS: &[&str] = &[
    "access-secret-fallback",
    "dev-jwt-secret-change-in-production",
    "secret",
    "changeme",
];

/// Returns true if `secret` is empty, too short, or a known fallback value.
pub fn is_insecure_secret(secret: &str) -> bool {
    secret.len() < 32
        || KNOWN_WEAK_SECRETS.contains(&secret)
        || secret.contains("changeme")
        || secret.contains("change-in-production")
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

/// Claims the server looks at. Everything else is ignored.
#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    sub: Option<String>,
    name: Option<String>,
    email: Option<String>,
    exp: Option<i64>,
    nbf: Option<i64>,
    iss: Option<String>,
}

/// HS256 verifier bound to one shared secret.
pub struct JwtVerifier {
    secret: Vec<u8>,
    leeway: i64,
    issuer: Option<String>,
}

impl JwtVerifier {
    pub fn new(secret: impl AsRef<[u8]>, leeway_secs: u64, issuer: Option<String>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            leeway: i64::try_from(leeway_secs).unwrap_or(i64::MAX),
            issuer,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(&config.jwt_secret, config.leeway_secs, config.issuer.clone())
    }

    fn verify_at(&self, token: &str, now: i64) -> Result<Identity, AuthError> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed("expected three segments"));
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != "HS256" {
            return Err(AuthError::UnsupportedAlgorithm(header.alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::Malformed("signature is not base64url"))?;
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| AuthError::Malformed("unusable secret"))?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let claims: Claims = decode_segment(payload_b64)?;

        if let Some(exp) = claims.exp
            && now > exp.saturating_add(self.leeway)
        {
            return Err(AuthError::Expired);
        }
        if let Some(nbf) = claims.nbf
            && now < nbf.saturating_sub(self.leeway)
        {
            return Err(AuthError::NotYetValid);
        }
        if let Some(expected) = &self.issuer
            && claims.iss.as_deref() != Some(expected.as_str())
        {
            return Err(AuthError::WrongIssuer);
        }

        let user_id = claims
            .user_id
            .or(claims.sub)
            .filter(|id| !id.is_empty())
            .ok_or(AuthError::MissingSubject)?;
        let display_name = claims
            .name
            .or(claims.email)
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| user_id.clone());

        Ok(Identity {
            user_id,
            display_name,
        })
    }
}

impl CredentialValidator for JwtVerifier {
    fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        self.verify_at(token, Utc::now().timestamp())
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::Malformed("segment is not base64url"))?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::Malformed("segment is not valid JSON"))
}
