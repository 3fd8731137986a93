//! `GET /metrics`, grounded on the teacher's `api/resilience::get_metrics`:
//! refresh the point-in-time gauges, then hand back whatever the recorder
//! has accumulated since startup.

use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};

use crate::state::AppState;

pub async fn get_metrics(State(state): State<AppState>) -> Response {
    let engines = state.fleet().list_engines().await;
    let capacity_used = state.fleet().capacity_used().await;
    let streams_started = state.fleet().streams_with_status(orchestrator_types::models::StreamStatus::Started).await.len();
    let breaker_trips = state.breaker().get_summary().total_trips;

    crate::metrics::update_gauges(engines.len(), capacity_used, streams_started, breaker_trips, state.uptime_secs());

    let body = crate::metrics::render();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")], body).into_response()
}
