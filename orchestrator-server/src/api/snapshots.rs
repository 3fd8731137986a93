//! Read-only fleet/stream/VPN/status snapshots (§6).

use axum::extract::{Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};

use orchestrator_types::models::{Engine, OrchestratorStatus, Stream, StreamStatus, Vpn};

use crate::state::AppState;

pub async fn list_engines(State(state): State<AppState>) -> Json<Vec<Engine>> {
    Json(state.fleet().list_engines().await)
}

#[derive(Debug, Deserialize)]
pub struct StreamsQuery {
    status: Option<String>,
}

pub async fn list_streams(State(state): State<AppState>, Query(query): Query<StreamsQuery>) -> Json<Vec<Stream>> {
    let status = match query.status.as_deref() {
        Some("ended") => StreamStatus::Ended,
        _ => StreamStatus::Started,
    };
    Json(state.fleet().streams_with_status(status).await)
}

pub async fn vpn_status(State(state): State<AppState>) -> Json<Vec<Vpn>> {
    Json(state.vpn().list().await)
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: OrchestratorStatus,
    pub capacity_used: usize,
    pub capacity_total: usize,
    pub free_count: u32,
    pub effective_min_replicas: u32,
    pub vpn_ok: bool,
    pub breaker: orchestrator_core::resilience::CircuitBreakerSummary,
}

/// §6: `capacity_used = count(unique engine_ids across started streams)`,
/// never the raw stream count — both counts come straight from Fleet
/// State's own accounting so that invariant holds by construction rather
/// than being recomputed here.
pub async fn orchestrator_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let capacity_used = state.fleet().capacity_used().await;
    let capacity_total = state.fleet().capacity_total().await;
    let free_count = state.fleet().free_count().await;
    let vpn_ok = state.vpn().vpn_ok().await;
    let breaker = state.breaker().get_summary();
    let breaker_open = breaker.open > 0;

    let effective_min = state.config().min_replicas;
    let status = OrchestratorStatus::derive(breaker_open, vpn_ok, free_count, effective_min);

    Json(StatusResponse { status, capacity_used, capacity_total, free_count, effective_min_replicas: effective_min, vpn_ok, breaker })
}
