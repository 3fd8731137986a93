//! Privileged provisioning/deletion endpoints (§6), gated by
//! `auth::require_token` in `router`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;

use orchestrator_core::autoscaler::TickReport;
use orchestrator_core::container::ContainerDriver;
use orchestrator_types::error::OrchestratorError;

use crate::api::ApiError;
use crate::state::AppState;

/// `POST /provision/acestream`: grows the fleet by exactly one engine,
/// via `Autoscaler::scale_to` rather than a dedicated "provision one"
/// primitive — `scale_to` already owns the clamping (`min_replicas`,
/// `max_replicas`, `max_active_replicas`) and circuit-breaker checks a
/// bespoke path would have to duplicate.
pub async fn provision(State(state): State<AppState>) -> Result<Json<TickReport>, ApiError> {
    let current_total = state.fleet().list_engines().await.len() as u32;
    let report = state.autoscaler().scale_to(current_total + 1).await.map_err(ApiError::from)?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct ReprovisionRequest {
    engine_id: String,
}

/// `POST /custom-variant/reprovision`: stops the named engine and relies
/// on the next `scale_to` call (held at the fleet's prior total) to
/// backfill it — decided this way because §6 names no separate
/// "recreate in place" container-driver primitive, only
/// create/stop/inspect (see DESIGN.md).
pub async fn reprovision(State(state): State<AppState>, Json(body): Json<ReprovisionRequest>) -> Result<Json<TickReport>, ApiError> {
    let prior_total = state.fleet().list_engines().await.len() as u32;

    state.driver().stop_container(&body.engine_id, 10).await.map_err(ApiError::from)?;
    state.fleet().remove_engine(&body.engine_id).await.ok_or_else(|| ApiError::from(OrchestratorError::NotFound(body.engine_id.clone())))?;

    let report = state.autoscaler().scale_to(prior_total).await.map_err(ApiError::from)?;
    Ok(Json(report))
}

/// `DELETE /engines/{id}`: stop and forget, no backfill.
pub async fn delete_engine(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode, ApiError> {
    state.driver().stop_container(&id, 10).await.map_err(ApiError::from)?;
    match state.fleet().remove_engine(&id).await {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::from(OrchestratorError::NotFound(id))),
    }
}
