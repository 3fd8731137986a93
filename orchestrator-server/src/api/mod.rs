//! HTTP surface (§6), grouped the way the teacher's `api/mod.rs` groups
//! its own routes: one module per concern, composed here into a single
//! `Router<AppState>` the top-level `router` module nests and wraps with
//! the privileged-route auth gate.

mod admin;
mod blacklist;
mod events;
mod metrics;
mod proxy;
mod snapshots;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{delete, get, post};
use axum::Router;
use serde_json::json;

use orchestrator_types::error::OrchestratorError;

use crate::state::AppState;

/// Wraps `OrchestratorError` so handlers can return it directly from a
/// `?`-propagating body and still get the status+code mapping `§7`
/// prescribes, mirroring the teacher's `AppError` used as a handler
/// return type (here made `IntoResponse` rather than mapped ad hoc per
/// handler).
pub struct ApiError(pub OrchestratorError);

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.0.status_and_code();
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": code, "message": self.0.to_string() }))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

/// Routes requiring no bearer token: admission, segment serving, and
/// read-only snapshots.
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/ace/getstream", get(proxy::get_stream))
        .route("/hls/:content_key/segment/:seq", get(proxy::hls_segment))
        .route("/engines", get(snapshots::list_engines))
        .route("/streams", get(snapshots::list_streams))
        .route("/vpn/status", get(snapshots::vpn_status))
        .route("/orchestrator/status", get(snapshots::orchestrator_status))
        .route("/looping-streams", get(blacklist::list_blacklisted))
        .route("/metrics", get(metrics::get_metrics))
}

/// Routes gated by `auth::require_token`: provisioning, deletion, and
/// external event ingress.
pub fn privileged_router() -> Router<AppState> {
    Router::new()
        .route("/provision/acestream", post(admin::provision))
        .route("/custom-variant/reprovision", post(admin::reprovision))
        .route("/engines/:id", delete(admin::delete_engine))
        .route("/events/stream_started", post(events::stream_started))
        .route("/events/stream_ended", post(events::stream_ended))
        .route("/looping-streams/:content_key", delete(blacklist::remove_blacklisted))
}

pub async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found", "message": "no such endpoint" })))
}
