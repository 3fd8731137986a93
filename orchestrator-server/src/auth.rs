//! Bearer-token middleware for privileged endpoints (§6), grounded on the
//! teacher's `admin_auth_middleware`: constant-time comparison, a single
//! configured token rather than per-user credentials, and "empty token
//! configured => refuse everything" rather than failing open.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

use crate::state::AppState;

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer ").or(Some(s)))
        .or_else(|| request.headers().get("x-api-key").and_then(|h| h.to_str().ok()))
}

/// Gates the privileged route group. Installed once via
/// `middleware::from_fn_with_state` over the nested `/provision`,
/// `/custom-variant`, `/engines` (delete), `/events`, and blacklist-delete
/// routes — never over read-only snapshots or segment serving.
pub async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, StatusCode> {
    let configured = state.api_token();
    if configured.is_empty() {
        tracing::error!("privileged endpoint requested but no API_TOKEN is configured; denying");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let presented = bearer_token(&request);
    let authorized = presented.is_some_and(|token| constant_time_compare(token, configured));

    if authorized {
        Ok(next.run(request).await)
    } else {
        tracing::warn!(path = %request.uri().path(), "rejected unauthorized request to privileged endpoint");
        Err(StatusCode::UNAUTHORIZED)
    }
}
