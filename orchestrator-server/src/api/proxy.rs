//! Admission and segment serving (§6): `GET /ace/getstream`, `GET
//! /hls/{content_key}/segment/{seq}.ts`. Mode dispatch follows
//! `config.proxy_stream_mode` — a single orchestrator instance runs either
//! the ring-buffer (TS) or segment-buffer (HLS) proxy, not both at once.

use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use uuid::Uuid;

use orchestrator_core::proxy::common::ChannelState;
use orchestrator_core::proxy::ts::TsProxyCore;
use orchestrator_types::config::ProxyStreamMode;

use crate::api::ApiError;
use crate::state::AppState;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Deserialize)]
pub struct GetStreamParams {
    id: String,
    /// Echoed back from a prior response's `X-Client-Id` header so a
    /// returning HLS player reuses its existing client entry instead of
    /// minting a fresh one on every manifest poll (see `current_manifest`
    /// on `HlsProxyCore`). Ignored in TS mode.
    client_id: Option<String>,
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .or_else(|| headers.get("x-real-ip").and_then(|h| h.to_str().ok()))
        .unwrap_or("unknown")
        .to_owned()
}

fn user_agent(headers: &HeaderMap) -> String {
    headers.get(header::USER_AGENT).and_then(|h| h.to_str().ok()).unwrap_or("unknown").to_owned()
}

pub async fn get_stream(State(state): State<AppState>, Query(params): Query<GetStreamParams>, headers: HeaderMap) -> Result<Response, ApiError> {
    let ip = client_ip(&headers);
    let ua = user_agent(&headers);

    match state.config().proxy_stream_mode {
        ProxyStreamMode::Ts => ts_stream(state, params.id, ip, ua).await,
        ProxyStreamMode::Hls => hls_manifest(state, params.id, ip, ua, params.client_id).await,
    }
}

async fn ts_stream(state: AppState, content_key: String, ip: String, ua: String) -> Result<Response, ApiError> {
    let ts_proxy = state.ts_proxy().clone();
    let (client_id, _buffer, _position) = ts_proxy.attach(&content_key, ip, ua).await.map_err(ApiError::from)?;

    let guard = TsStreamGuard { ts_proxy: ts_proxy.clone(), content_key: content_key.clone(), client_id };
    let body_stream = async_stream::stream! {
        let _guard = guard;
        loop {
            match ts_proxy.next_chunk(&content_key, client_id) {
                Some(chunk) => {
                    ts_proxy.heartbeat(&content_key, client_id);
                    yield Ok::<_, std::io::Error>(chunk);
                },
                None => match ts_proxy.session_state(&content_key) {
                    Some(ChannelState::Stopped) | None => break,
                    _ => {
                        ts_proxy.heartbeat(&content_key, client_id);
                        tokio::time::sleep(POLL_INTERVAL).await;
                    },
                },
            }
        }
    };

    Ok(([(header::CONTENT_TYPE, "video/mp2t")], axum::body::Body::from_stream(body_stream)).into_response())
}

/// Detaches the client when the response body is dropped, whether the
/// player read to completion or the connection was simply closed early.
/// `detach` is async, so the drop hands off to a spawned task rather than
/// blocking whatever is dropping the stream.
struct TsStreamGuard {
    ts_proxy: std::sync::Arc<TsProxyCore>,
    content_key: String,
    client_id: Uuid,
}

impl Drop for TsStreamGuard {
    fn drop(&mut self) {
        let ts_proxy = self.ts_proxy.clone();
        let content_key = self.content_key.clone();
        let client_id = self.client_id;
        tokio::spawn(async move { ts_proxy.detach(&content_key, client_id).await });
    }
}

async fn hls_manifest(state: AppState, content_key: String, ip: String, ua: String, client_id: Option<String>) -> Result<Response, ApiError> {
    let hls_proxy = state.hls_proxy();

    let reused = client_id.and_then(|raw| Uuid::parse_str(&raw).ok()).and_then(|id| hls_proxy.current_manifest(&content_key, id).map(|manifest| (id, manifest)));

    let (client_id, manifest) = match reused {
        Some(pair) => pair,
        None => hls_proxy.manifest(&content_key, ip, ua).await.map_err(ApiError::from)?,
    };

    Ok(axum::response::Response::builder()
        .header(header::CONTENT_TYPE, "application/vnd.apple.mpegurl")
        .header("x-client-id", client_id.to_string())
        .body(axum::body::Body::from(manifest))
        .expect("response with well-formed headers"))
}

/// axum matches the whole final path segment, so `seq` arrives as e.g.
/// `"42.ts"` rather than a bare number — strip the container-format
/// suffix before parsing.
fn parse_segment_seq(raw: &str) -> Option<u64> {
    raw.strip_suffix(".ts").unwrap_or(raw).parse().ok()
}

pub async fn hls_segment(State(state): State<AppState>, Path((content_key, seq_raw)): Path<(String, String)>) -> Response {
    let Some(seq) = parse_segment_seq(&seq_raw) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match state.hls_proxy().segment(&content_key, seq) {
        Some(bytes) => ([(header::CONTENT_TYPE, "video/mp2t")], bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
