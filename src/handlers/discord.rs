use axum::{extract::State, Json};
use serde::Serialize;

use super::json::ApiJson;
use crate::{services::notifier::ExecutionReport, state::AppState};

#[derive(Serialize)]
pub struct LogResponse {
    pub success: bool,
}

/// Queues an execution report for the Discord webhook.
///
/// Delivery is best effort; the caller is always told the report was taken.
pub async fn log_discord(
    State(state): State<AppState>,
    ApiJson(report): ApiJson<ExecutionReport>,
) -> Json<LogResponse> {
    state.notifier.enqueue(report);
    Json(LogResponse { success: true })
}
