use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{models::provider::Provider, state::AppState};

/// Query parameters providers use to echo the session id back.
const CORRELATION_PARAMS: [&str; 4] = ["sid", "session_id", "custom_id", "subid"];

fn correlation_id(params: &HashMap<String, String>) -> Option<&str> {
    CORRELATION_PARAMS
        .iter()
        .filter_map(|name| params.get(*name))
        .map(|value| value.trim())
        .find(|value| !value.is_empty())
}

/// Handles a completion callback from a callback-style provider.
pub async fn provider_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(provider) = Provider::parse(&provider) else {
        return (StatusCode::BAD_REQUEST, "invalid id");
    };
    let Some(session_id) = correlation_id(&params) else {
        tracing::debug!(provider = %provider, "Callback without correlation id");
        return (StatusCode::BAD_REQUEST, "invalid id");
    };

    if state.checkpoints.confirm_callback(provider, session_id).await {
        (StatusCode::OK, "OK")
    } else {
        tracing::warn!(provider = %provider, "❌ Callback for unknown session");
        (StatusCode::BAD_REQUEST, "invalid id")
    }
}
