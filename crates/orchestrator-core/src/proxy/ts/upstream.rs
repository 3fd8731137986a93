//! Engine contract consumed when opening an MPEG-TS session (§4.8 step 3,
//! §6 "Engine (upstream) contract consumed").
//!
//! Split into two calls because they have entirely different shapes: `open`
//! is a one-shot JSON control call (same request/response style as
//! `streams::upstream::EngineUpstreamClient`), while `open_byte_stream` is a
//! long-lived body the reader consumes chunk by chunk. Grounded on
//! `proxy/common/client_builder.rs` for the `reqwest::Client` construction
//! (timeout, no extra proxy plumbing needed here) and on the `stream`
//! cargo feature already pulled in for `reqwest::Response::bytes_stream`.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Deserialize;

use orchestrator_types::error::{OrchestratorError, Result};
use orchestrator_types::models::Engine;

use crate::proxy::common::ACCEPT_ENCODING_IDENTITY;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedStream {
    pub playback_url: String,
    pub stat_url: String,
    pub command_url: String,
    pub playback_session_id: String,
}

#[async_trait]
pub trait TsUpstream: Send + Sync {
    async fn open(&self, engine: &Engine, content_key: &str) -> Result<OpenedStream>;
    async fn open_byte_stream(&self, playback_url: &str) -> Result<BoxStream<'static, Result<Bytes>>>;
}

#[derive(Debug, Deserialize)]
struct GetStreamResponse {
    response: GetStreamInner,
}

#[derive(Debug, Deserialize)]
struct GetStreamInner {
    playback_url: String,
    stat_url: String,
    command_url: String,
    playback_session_id: String,
}

pub struct ReqwestTsUpstream {
    client: reqwest::Client,
}

impl ReqwestTsUpstream {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(OrchestratorError::TransientNetwork)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TsUpstream for ReqwestTsUpstream {
    async fn open(&self, engine: &Engine, content_key: &str) -> Result<OpenedStream> {
        let url = format!("http://{}:{}/ace/getstream?infohash={content_key}&format=json", engine.host, engine.port);
        let resp: GetStreamResponse = self.client.get(url).send().await?.json().await?;
        Ok(OpenedStream {
            playback_url: resp.response.playback_url,
            stat_url: resp.response.stat_url,
            command_url: resp.response.command_url,
            playback_session_id: resp.response.playback_session_id,
        })
    }

    async fn open_byte_stream(&self, playback_url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let resp = self
            .client
            .get(playback_url)
            .header(ACCEPT_ENCODING_IDENTITY.0, ACCEPT_ENCODING_IDENTITY.1)
            .send()
            .await?;
        let stream = resp.bytes_stream().map(|r| r.map_err(OrchestratorError::TransientNetwork));
        Ok(stream.boxed())
    }
}
