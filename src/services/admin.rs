use crate::crypto::token::{generate_admin_key, secrets_match};
use crate::error::{AppError, Result};
use crate::models::key::{BanRecord, KeyRecord};
use crate::state::AppState;
use crate::validation::requests::{validate_hwid, validate_key, validate_max_hwids};

/// Checks the administrator secret.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `given` - The secret sent by the caller.
///
/// # Returns
///
/// `Ok(())` on a match, `AppError::Unauthorized` otherwise.
pub fn require_admin(state: &AppState, given: &str) -> Result<()> {
    let expected = state.config.admin_secret.as_str();
    if expected.is_empty() || !secrets_match(given, expected) {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

/// Issues a key without going through the checkpoint flow.
pub async fn generate_key(state: &AppState, hours: i64, max_hwids: Option<i64>) -> Result<KeyRecord> {
    let hours = u32::try_from(hours)
        .ok()
        .filter(|h| *h >= 1)
        .ok_or_else(|| AppError::Validation("hours must be a positive number".to_string()))?;
    let max_hwids = match max_hwids {
        Some(value) => validate_max_hwids(value)?,
        None => state.config.checkpoint.default_max_hwids,
    };

    let record = KeyRecord::new(generate_admin_key(hours), hours, max_hwids, state.clock.now_utc());
    state.keys.insert(&record).await?;

    tracing::info!(key = %record.key, hours, max_hwids, "🔑 Admin key generated");
    Ok(record)
}

pub async fn list_keys(state: &AppState) -> Result<Vec<KeyRecord>> {
    state.keys.list().await
}

pub async fn reset_hwids(state: &AppState, key: &str) -> Result<bool> {
    let key = validate_key(key)?;
    let found = state.keys.reset_hwids(key).await?;
    if found {
        tracing::info!(key = %key, "♻️ Hardware ids reset");
    }
    Ok(found)
}

pub async fn remove_single_hwid(state: &AppState, key: &str, hwid: &str) -> Result<bool> {
    let key = validate_key(key)?;
    let hwid = validate_hwid(hwid)?;
    let removed = state.keys.remove_hwid(key, hwid).await?;
    if removed {
        tracing::info!(key = %key, hwid = %hwid, "♻️ Hardware id unbound");
    }
    Ok(removed)
}

pub async fn set_max_hwids(state: &AppState, key: &str, max_hwids: i64) -> Result<bool> {
    let key = validate_key(key)?;
    let max_hwids = validate_max_hwids(max_hwids)?;
    state.keys.set_max_hwids(key, max_hwids).await
}

pub async fn ban_hwid(state: &AppState, hwid: &str, reason: Option<&str>) -> Result<()> {
    let hwid = validate_hwid(hwid)?;
    state.bans.ban(hwid, reason, state.clock.now_utc()).await?;
    tracing::warn!(hwid = %hwid, "🚫 Hardware id banned");
    Ok(())
}

pub async fn unban_hwid(state: &AppState, hwid: &str) -> Result<bool> {
    let hwid = validate_hwid(hwid)?;
    state.bans.unban(hwid).await
}

pub async fn list_bans(state: &AppState) -> Result<Vec<BanRecord>> {
    state.bans.list().await
}

pub async fn delete_key(state: &AppState, key: &str) -> Result<bool> {
    let key = validate_key(key)?;
    let removed = state.keys.delete(key).await?;
    if removed {
        tracing::info!(key = %key, "🗑️ Key deleted");
    }
    Ok(removed)
}
