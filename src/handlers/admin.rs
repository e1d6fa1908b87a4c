use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::json::ApiJson;
use crate::{
    error::Result,
    models::key::{BanRecord, KeyRecord},
    services::admin as admin_service,
    state::AppState,
};

/// The request payload for `POST /admin/generate`.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub admin_secret: String,
    pub hours: i64,
    pub max_hwids: Option<i64>,
}

/// Requests that only carry the administrator secret.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AdminRequest {
    #[serde(default)]
    pub admin_secret: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequest {
    #[serde(default)]
    pub admin_secret: String,
    pub key: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct KeyHwidRequest {
    #[serde(default)]
    pub admin_secret: String,
    pub key: String,
    pub hwid: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SetMaxHwidsRequest {
    #[serde(default)]
    pub admin_secret: String,
    pub key: String,
    pub max_hwids: i64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BanRequest {
    #[serde(default)]
    pub admin_secret: String,
    pub hwid: String,
    pub reason: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HwidRequest {
    #[serde(default)]
    pub admin_secret: String,
    pub hwid: String,
}

/// The response payload for admin operations without data.
#[derive(Serialize, Debug)]
pub struct AdminResponse {
    pub success: bool,
    pub message: String,
}

impl AdminResponse {
    fn outcome(success: bool, done: &str, missing: &str) -> Json<Self> {
        Json(Self {
            success,
            message: if success { done } else { missing }.to_string(),
        })
    }
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub success: bool,
    pub key: String,
    pub expires_at: DateTime<Utc>,
    pub max_hwids: i32,
}

/// A key as shown to administrators.
#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct KeyView {
    pub key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hwids: Vec<String>,
    pub max_hwids: i32,
    pub expired: bool,
}

impl KeyView {
    fn new(record: KeyRecord, now: DateTime<Utc>) -> Self {
        Self {
            expired: record.is_expired(now),
            key: record.key,
            created_at: record.created_at,
            expires_at: record.expires_at,
            hwids: record.bound_hwids,
            max_hwids: record.max_hwids,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ListKeysResponse {
    pub success: bool,
    pub keys: Vec<KeyView>,
}

#[derive(Serialize, Debug)]
pub struct ListBansResponse {
    pub success: bool,
    pub bans: Vec<BanRecord>,
}

const KEY_NOT_FOUND: &str = "Key not found";

/// Issues a key outside the checkpoint flow.
pub async fn generate(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<GenerateRequest>,
) -> Result<Json<GenerateResponse>> {
    admin_service::require_admin(&state, &payload.admin_secret)?;
    let record = admin_service::generate_key(&state, payload.hours, payload.max_hwids).await?;

    Ok(Json(GenerateResponse {
        success: true,
        key: record.key,
        expires_at: record.expires_at,
        max_hwids: record.max_hwids,
    }))
}

pub async fn list_keys(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<AdminRequest>,
) -> Result<Json<ListKeysResponse>> {
    admin_service::require_admin(&state, &payload.admin_secret)?;
    let now = state.clock.now_utc();
    let keys = admin_service::list_keys(&state)
        .await?
        .into_iter()
        .map(|record| KeyView::new(record, now))
        .collect();

    Ok(Json(ListKeysResponse {
        success: true,
        keys,
    }))
}

pub async fn reset_hwid(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<KeyRequest>,
) -> Result<Json<AdminResponse>> {
    admin_service::require_admin(&state, &payload.admin_secret)?;
    let found = admin_service::reset_hwids(&state, &payload.key).await?;
    Ok(AdminResponse::outcome(found, "Hardware ids reset", KEY_NOT_FOUND))
}

pub async fn remove_single_hwid(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<KeyHwidRequest>,
) -> Result<Json<AdminResponse>> {
    admin_service::require_admin(&state, &payload.admin_secret)?;
    let removed =
        admin_service::remove_single_hwid(&state, &payload.key, &payload.hwid).await?;
    Ok(AdminResponse::outcome(
        removed,
        "Hardware id removed",
        "Key not found or hardware id not bound",
    ))
}

pub async fn set_max_hwids(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SetMaxHwidsRequest>,
) -> Result<Json<AdminResponse>> {
    admin_service::require_admin(&state, &payload.admin_secret)?;
    let found = admin_service::set_max_hwids(&state, &payload.key, payload.max_hwids).await?;
    Ok(AdminResponse::outcome(found, "Device limit updated", KEY_NOT_FOUND))
}

pub async fn ban_hwid(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<BanRequest>,
) -> Result<Json<AdminResponse>> {
    admin_service::require_admin(&state, &payload.admin_secret)?;
    admin_service::ban_hwid(&state, &payload.hwid, payload.reason.as_deref()).await?;
    Ok(AdminResponse::outcome(true, "Hardware id banned", ""))
}

pub async fn unban_hwid(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<HwidRequest>,
) -> Result<Json<AdminResponse>> {
    admin_service::require_admin(&state, &payload.admin_secret)?;
    let removed = admin_service::unban_hwid(&state, &payload.hwid).await?;
    Ok(AdminResponse::outcome(
        removed,
        "Hardware id unbanned",
        "Hardware id was not banned",
    ))
}

pub async fn list_bans(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<AdminRequest>,
) -> Result<Json<ListBansResponse>> {
    admin_service::require_admin(&state, &payload.admin_secret)?;
    let bans = admin_service::list_bans(&state).await?;
    Ok(Json(ListBansResponse {
        success: true,
        bans,
    }))
}

pub async fn delete_key(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<KeyRequest>,
) -> Result<Json<AdminResponse>> {
    admin_service::require_admin(&state, &payload.admin_secret)?;
    let removed = admin_service::delete_key(&state, &payload.key).await?;
    Ok(AdminResponse::outcome(removed, "Key deleted", KEY_NOT_FOUND))
}
