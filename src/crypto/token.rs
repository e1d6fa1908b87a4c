use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// The size of a step token in bytes.
const STEP_TOKEN_SIZE: usize = 16;
/// The size of a provider secret in bytes.
const PROVIDER_SECRET_SIZE: usize = 16;
/// The size of the random key suffix in bytes (8 hex characters).
const KEY_SUFFIX_SIZE: usize = 4;

/// Lifetimes above this many hours are rendered as `LIFE` in admin keys.
pub const LIFETIME_THRESHOLD_HOURS: u32 = 10_000;

/// Namespace every issued key starts with.
pub const KEY_NAMESPACE: &str = "MULTI";

fn random_url_safe(size: usize) -> String {
    let mut bytes = vec![0u8; size];
    OsRng.fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Generates a new session id.
pub fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generates a new anti-replay step token.
///
/// # Returns
///
/// A URL-safe base64-encoded token.
pub fn generate_step_token() -> String {
    random_url_safe(STEP_TOKEN_SIZE)
}

/// Generates the one-time secret embedded in a provider destination.
pub fn generate_provider_secret() -> String {
    random_url_safe(PROVIDER_SECRET_SIZE)
}

fn key_suffix() -> String {
    let mut bytes = [0u8; KEY_SUFFIX_SIZE];
    OsRng.fill_bytes(&mut bytes);
    hex::encode_upper(bytes)
}

/// Builds a key string such as `MULTI-WK-24H-A1B2C3D4`.
pub fn generate_key(tag: &str, hours: u32) -> String {
    format!("{}-{}-{}H-{}", KEY_NAMESPACE, tag, hours, key_suffix())
}

/// Builds an administrative key; very long lifetimes read `MULTI-ADMIN-LIFE-…`.
pub fn generate_admin_key(hours: u32) -> String {
    if hours > LIFETIME_THRESHOLD_HOURS {
        format!("{}-ADMIN-LIFE-{}", KEY_NAMESPACE, key_suffix())
    } else {
        generate_key("ADMIN", hours)
    }
}

/// Compares two secrets in constant time.
pub fn secrets_match(given: &str, expected: &str) -> bool {
    given.as_bytes().ct_eq(expected.as_bytes()).into()
}
