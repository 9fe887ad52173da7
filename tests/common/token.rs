//! HS256 token minting for tests.

#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;

/// Secret the test server verifies with.
pub const SECRET: &str = "integration-test-secret-0123456789abcdef";

pub fn sign(claims: &Value, secret: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    let signing_input = format!("{header}.{payload}");
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{signing_input}.{signature}")
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Valid for an hour.
pub fn token_for(user: &str) -> String {
    sign(
        &json!({
            "userId": user,
            "name": format!("{user} (test)"),
            "exp": now() + 3600,
        }),
        SECRET,
    )
}

pub fn expired_token(user: &str) -> String {
    sign(&json!({ "userId": user, "exp": now() - 3600 }), SECRET)
}

pub fn forged_token(user: &str) -> String {
    sign(
        &json!({ "userId": user, "exp": now() + 3600 }),
        "not-the-server-secret-0123456789abcdef",
    )
}
