//! Loop-blacklist management (§6): `GET /looping-streams`, `DELETE
//! /looping-streams/{id}`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;

use orchestrator_core::streams::BlacklistEntry;

use crate::state::AppState;

pub async fn list_blacklisted(State(state): State<AppState>) -> Json<Vec<BlacklistEntry>> {
    Json(state.blacklist().list())
}

pub async fn remove_blacklisted(State(state): State<AppState>, Path(content_key): Path<String>) -> StatusCode {
    if state.blacklist().remove(&content_key) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
