//! Stream model — C2's view of an active or recently-ended upstream
//! session. The proxy-internal `Session`/`Client` records (buffer state,
//! per-client heartbeats) live in `orchestrator_core::proxy`, not here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::EngineId;

/// Server-assigned stream identifier.
pub type StreamId = Uuid;

/// The upstream content identifier the proxy multiplexes by, typically an
/// infohash.
pub type ContentKey = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Started,
    Ended,
}

/// Most recent metrics snapshot from the engine's `stat_url` (§6 Engine
/// contract).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreamMetrics {
    pub speed_down: u64,
    pub speed_up: u64,
    pub peers: u32,
    pub downloaded: u64,
    pub uploaded: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stream {
    pub stream_id: StreamId,
    pub content_key: ContentKey,
    pub engine_id: EngineId,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: StreamStatus,
    pub playback_session_id: String,
    pub stat_url: String,
    pub command_url: String,
    pub live_last: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: StreamMetrics,
}

impl Stream {
    pub fn new(
        content_key: ContentKey,
        engine_id: EngineId,
        playback_session_id: String,
        stat_url: String,
        command_url: String,
    ) -> Self {
        Self {
            stream_id: Uuid::new_v4(),
            content_key,
            engine_id,
            started_at: Utc::now(),
            ended_at: None,
            status: StreamStatus::Started,
            playback_session_id,
            stat_url,
            command_url,
            live_last: None,
            metrics: StreamMetrics::default(),
        }
    }

    /// Transitions the stream to `ended`, satisfying I6 (`ended_at` is set
    /// iff `status=ended`). No-op if already ended, so callers on
    /// different loops (stats collector vs. loop detector) racing to end
    /// the same stream cannot double-stamp `ended_at` (P6).
    pub fn mark_ended(&mut self) {
        if self.status == StreamStatus::Ended {
            return;
        }
        self.status = StreamStatus::Ended;
        self.ended_at = Some(Utc::now());
    }

    pub const fn is_started(&self) -> bool {
        matches!(self.status, StreamStatus::Started)
    }
}
