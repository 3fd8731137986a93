//! External event ingress (§6): `POST /events/stream_started`, `POST
//! /events/stream_ended`. Bearer-token-gated twins of the path the proxy
//! cores already call in-process (`FleetState::insert_stream`/
//! `end_stream`) — for integrations that open or close an engine session
//! outside the TS/HLS proxy entirely.

use axum::extract::State;
use axum::response::Json;
use serde::{Deserialize, Serialize};

use orchestrator_types::error::OrchestratorError;
use orchestrator_types::models::{Stream, StreamEndReason, StreamId};

use crate::api::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StreamStartedRequest {
    pub content_key: String,
    pub engine_id: String,
    pub playback_session_id: String,
    pub stat_url: String,
    pub command_url: String,
}

#[derive(Debug, Serialize)]
pub struct StreamStartedResponse {
    pub stream_id: StreamId,
}

pub async fn stream_started(State(state): State<AppState>, Json(body): Json<StreamStartedRequest>) -> Json<StreamStartedResponse> {
    let stream = Stream::new(body.content_key, body.engine_id, body.playback_session_id, body.stat_url, body.command_url);
    let stream_id = stream.stream_id;
    state.fleet().insert_stream(stream).await;
    Json(StreamStartedResponse { stream_id })
}

#[derive(Debug, Deserialize)]
pub struct StreamEndedRequest {
    pub stream_id: StreamId,
    pub reason: StreamEndReason,
}

pub async fn stream_ended(State(state): State<AppState>, Json(body): Json<StreamEndedRequest>) -> Result<Json<()>, ApiError> {
    match state.fleet().end_stream(&body.stream_id, body.reason).await {
        Some(_content_key) => Ok(Json(())),
        None => Err(ApiError::from(OrchestratorError::NotFound(body.stream_id.to_string()))),
    }
}
