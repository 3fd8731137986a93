//! Top-level route composition, mirroring the teacher's `router.rs`
//! privileged/public split: the privileged group is nested and wrapped
//! with the auth middleware, merged with the public group, then resolved
//! against `AppState` before logging/CORS layers are applied.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{middleware, Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::auth;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let privileged = api::privileged_router().layer(middleware::from_fn_with_state(state.clone(), auth::require_token));

    let public = api::public_router()
        .route("/health", get(health_check))
        .route("/healthz", get(health_check))
        .route("/version", get(version_info));

    privileged
        .merge(public)
        .with_state(state)
        .fallback(api::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn version_info() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "version": option_env!("GIT_VERSION").unwrap_or("dev") })))
}
