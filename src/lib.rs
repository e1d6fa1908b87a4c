use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use anyhow::Context;
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod providers;
pub mod state;

pub mod crypto {
    pub mod token;
}

pub mod models {
    pub mod key;
    pub mod provider;
    pub mod session;
}

pub mod repositories {
    pub mod ban;
    pub mod key;
    pub mod memory;
}

pub mod services {
    pub mod admin;
    pub mod checkpoint;
    pub mod notifier;
    pub mod verification;
}

pub mod handlers {
    pub mod admin;
    pub mod checkpoint;
    pub mod discord;
    pub mod health;
    pub mod json;
    pub mod verify;
    pub mod webhook;
}

pub mod middleware_layer {
    pub mod rate_limit;
}

pub mod validation {
    pub mod requests;
}

use state::AppState;

/// Request bodies are small JSON documents.
const BODY_LIMIT_BYTES: usize = 64 * 1024;

fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let allow_origin = if origins.is_empty() {
        AllowOrigin::from(Any)
    } else {
        let parsed = origins
            .iter()
            .map(|origin| {
                origin
                    .parse::<HeaderValue>()
                    .with_context(|| format!("Invalid CORS origin '{}'", origin))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        AllowOrigin::list(parsed)
    };

    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]))
}

/// Builds the full HTTP router.
///
/// The admin routes sit behind a per-IP governor, so the service must be
/// served with `into_make_service_with_connect_info::<SocketAddr>()`.
///
/// # Arguments
///
/// * `state` - The application state.
///
/// # Returns
///
/// The router, or an error if the CORS origins or governor settings are invalid.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let admin_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(20)
            .use_headers()
            .finish()
            .context("Invalid admin rate limiter settings")?,
    );

    let step_routes = Router::new()
        .route("/process-step", post(handlers::checkpoint::process_step))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware_layer::rate_limit::rate_limit_session_start,
        ))
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/verify", get(handlers::verify::verify))
        .route(
            "/webhook/{provider}",
            get(handlers::webhook::provider_callback),
        )
        .route("/log-discord", post(handlers::discord::log_discord))
        .route("/health", get(handlers::health::health))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/admin/generate", post(handlers::admin::generate))
        .route("/admin/list-keys", post(handlers::admin::list_keys))
        .route("/admin/reset-hwid", post(handlers::admin::reset_hwid))
        .route(
            "/admin/remove-single-hwid",
            post(handlers::admin::remove_single_hwid),
        )
        .route("/admin/set-max-hwids", post(handlers::admin::set_max_hwids))
        .route("/admin/ban-hwid", post(handlers::admin::ban_hwid))
        .route("/admin/unban-hwid", post(handlers::admin::unban_hwid))
        .route("/admin/list-bans", post(handlers::admin::list_bans))
        .route("/admin/delete-key", post(handlers::admin::delete_key))
        .layer(tower_governor::GovernorLayer::new(admin_governor_conf))
        .with_state(state.clone());

    Ok(Router::new()
        .merge(step_routes)
        .merge(public_routes)
        .merge(admin_routes)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default())
                .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
        )
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(cors_layer(&state.config.cors_origins)?))
}
