use std::sync::Arc;

use serde::Serialize;

use crate::clock::Clock;
use crate::error::Result;
use crate::models::key::BindOutcome;
use crate::repositories::{ban::BanStore, key::KeyStore};

/// The response payload for `GET /verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub message: String,
    #[serde(rename = "timeLeft", skip_serializing_if = "Option::is_none")]
    pub time_left: Option<String>,
}

impl VerifyResponse {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
            time_left: None,
        }
    }

    fn valid(hours_left: i64) -> Self {
        Self {
            valid: true,
            message: "Access authorized".to_string(),
            time_left: Some(format!("{} hours", hours_left)),
        }
    }
}

/// Verifies a key for a hardware id.
///
/// Checks, in order: ban list, key existence, expiry (expired keys are
/// deleted), existing binding, then binds the hardware id if the key still
/// has capacity. The membership check and the binding are one atomic store
/// operation.
pub async fn verify(
    keys: &Arc<dyn KeyStore>,
    bans: &Arc<dyn BanStore>,
    clock: &Arc<dyn Clock>,
    key: &str,
    hwid: &str,
) -> Result<VerifyResponse> {
    if bans.is_banned(hwid).await? {
        tracing::warn!(hwid = %hwid, "❌ Banned hardware id tried to verify");
        return Ok(VerifyResponse::invalid("This device is banned"));
    }

    let Some(record) = keys.get(key).await? else {
        tracing::debug!(key = %key, "Unknown key");
        return Ok(VerifyResponse::invalid("Key is invalid or does not exist"));
    };

    let now = clock.now_utc();
    if record.is_expired(now) {
        keys.delete(key).await?;
        tracing::info!(key = %key, "🧹 Expired key removed at verification");
        return Ok(VerifyResponse::invalid("This key has expired, please get a new one"));
    }

    match keys.bind_hwid(key, hwid).await? {
        BindOutcome::AlreadyBound => Ok(VerifyResponse::valid(record.hours_left(now))),
        BindOutcome::Bound => {
            tracing::info!(key = %key, hwid = %hwid, "✅ Hardware id bound to key");
            Ok(VerifyResponse::valid(record.hours_left(now)))
        }
        BindOutcome::CapacityReached => {
            tracing::warn!(key = %key, "❌ Key binding capacity reached");
            Ok(VerifyResponse::invalid(
                "Key is already bound to the maximum number of devices",
            ))
        }
        // Deleted between the read and the binding.
        BindOutcome::Missing => Ok(VerifyResponse::invalid("Key is invalid or does not exist")),
    }
}
