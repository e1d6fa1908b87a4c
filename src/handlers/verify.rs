use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

use crate::{
    services::verification::{self, VerifyResponse},
    state::AppState,
};

/// The query string of `GET /verify`.
#[derive(Deserialize, Debug, Default)]
pub struct VerifyQuery {
    pub key: Option<String>,
    pub hwid: Option<String>,
}

/// Handles key verification.
pub async fn verify(
    State(state): State<AppState>,
    Query(query): Query<VerifyQuery>,
) -> Json<VerifyResponse> {
    let key = query.key.as_deref().map(str::trim).unwrap_or_default();
    let hwid = query.hwid.as_deref().map(str::trim).unwrap_or_default();
    if key.is_empty() || hwid.is_empty() {
        return Json(VerifyResponse::invalid("Missing key or hwid"));
    }

    match verification::verify(&state.keys, &state.bans, &state.clock, key, hwid).await {
        Ok(response) => Json(response),
        Err(e) => {
            tracing::error!("❌ Verification failed: {}", e);
            Json(VerifyResponse::invalid("verification unavailable"))
        }
    }
}
