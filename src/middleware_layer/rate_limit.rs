use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use sonic_rs::JsonValueTrait;
use std::net::SocketAddr;

use crate::{error::AppError, state::AppState};

/// Length of the session start window, in seconds.
const WINDOW_SECS: i64 = 3600;
/// Upper bound on a step body; the router enforces a smaller limit first.
const MAX_PEEK_BYTES: usize = 64 * 1024;

/// Extracts the peer IP address from the request extensions.
///
/// # Arguments
///
/// * `req` - The incoming request.
///
/// # Returns
///
/// The IP address as a string, or "unknown" if not found.
fn extract_real_ip(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Whether a step body starts a new session.
///
/// A missing, empty or unknown `session_id` all lead to a fresh session, so
/// each of them is counted.
fn starts_session(body_bytes: &[u8], is_live: impl Fn(&str) -> bool) -> bool {
    match sonic_rs::from_slice::<sonic_rs::Value>(body_bytes) {
        Ok(json) => match json.get("session_id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => !is_live(id),
            _ => true,
        },
        // Unparseable bodies are refused by the handler; don't count them.
        Err(_) => false,
    }
}

/// A middleware that rate limits checkpoint session starts per client IP.
///
/// Only requests that would bootstrap a session are counted. Does nothing when Redis
/// is not configured; Redis errors let the request through.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
///
/// # Returns
///
/// A `Response` or an error `AppError`.
pub async fn rate_limit_session_start(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(redis) = state.redis.clone() else {
        return next.run(req).await;
    };

    let ip = extract_real_ip(&req);
    let (parts, body) = req.into_parts();
    let body_bytes = match axum::body::to_bytes(body, MAX_PEEK_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return AppError::Validation("Request body too large".to_string()).into_response();
        }
    };

    if starts_session(&body_bytes, |id| state.checkpoints.contains(id)) {
        let key = format!("rate_limit:session_start:{}", ip);
        let mut conn = redis;

        let count: Option<i64> = redis::cmd("INCR")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(|e| tracing::error!("❌ Rate limit counter unavailable: {}", e))
            .ok();

        if count == Some(1) {
            let _: () = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(WINDOW_SECS)
                .query_async(&mut conn)
                .await
                .unwrap_or(());
        }

        if let Some(starts) = count {
            if starts > i64::from(state.config.session_starts_per_hour) {
                let ttl: Option<i64> = redis::cmd("TTL")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .unwrap_or(None);

                tracing::warn!(ip = %ip, starts, "Session start limit hit");
                return AppError::RateLimitExceeded(format!(
                    "Too many checkpoint sessions started. Try again in {} minutes",
                    ttl.unwrap_or(WINDOW_SECS).max(60) / 60
                ))
                .into_response();
            }
        }
    }

    next.run(Request::from_parts(parts, Body::from(body_bytes))).await
}
