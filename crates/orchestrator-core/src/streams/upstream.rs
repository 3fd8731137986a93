//! Engine (upstream) HTTP contract consumed by the Stream Registry (§6
//! "Engine (upstream) contract consumed").

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use orchestrator_types::error::{OrchestratorError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct StatSnapshot {
    pub speed_down: u64,
    pub speed_up: u64,
    pub peers: u32,
    pub downloaded: u64,
    pub uploaded: u64,
    pub live_last: Option<DateTime<Utc>>,
    pub playback_session_id: String,
    pub stopped: bool,
}

/// What the Stream Registry needs from a stream's upstream engine session:
/// poll `stat_url`, and issue `stop` against `command_url`.
#[async_trait]
pub trait EngineUpstreamClient: Send + Sync {
    async fn fetch_stats(&self, stat_url: &str) -> Result<StatSnapshot>;
    async fn stop(&self, command_url: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct StatResponse {
    speed_down: u64,
    speed_up: u64,
    peers: u32,
    downloaded: u64,
    uploaded: u64,
    live_last: Option<i64>,
    playback_session_id: String,
    status: String,
}

pub struct ReqwestUpstreamClient {
    client: reqwest::Client,
}

impl ReqwestUpstreamClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(OrchestratorError::TransientNetwork)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EngineUpstreamClient for ReqwestUpstreamClient {
    async fn fetch_stats(&self, stat_url: &str) -> Result<StatSnapshot> {
        let resp: StatResponse = self.client.get(stat_url).send().await?.json().await?;
        Ok(StatSnapshot {
            speed_down: resp.speed_down,
            speed_up: resp.speed_up,
            peers: resp.peers,
            downloaded: resp.downloaded,
            uploaded: resp.uploaded,
            live_last: resp.live_last.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            playback_session_id: resp.playback_session_id,
            stopped: resp.status == "stopped",
        })
    }

    async fn stop(&self, command_url: &str) -> Result<()> {
        self.client.get(format!("{command_url}?method=stop")).send().await?;
        Ok(())
    }
}
