use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};

use crate::{
    services::checkpoint::{StepRequest, StepResponse},
    state::AppState,
};

/// Handles one checkpoint protocol step.
///
/// Every protocol outcome, including failures and unreadable bodies, is
/// answered in-band with HTTP 200 and a `status` discriminator.
pub async fn process_step(
    State(state): State<AppState>,
    payload: Result<Json<StepRequest>, JsonRejection>,
) -> Json<StepResponse> {
    match payload {
        Ok(Json(request)) => Json(state.checkpoints.advance(request).await),
        Err(rejection) => {
            tracing::debug!("Unreadable step body: {}", rejection.body_text());
            Json(StepResponse::Error {
                message: "Invalid request body".to_string(),
            })
        }
    }
}
