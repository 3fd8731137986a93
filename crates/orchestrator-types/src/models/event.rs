//! The typed event set fanned out by the Event Bus (C10).
//!
//! Generalizes the teacher's single-event `ProxyEventBus` to the closed
//! set §4.10 names. Kept in `orchestrator-types` (not `orchestrator-core`)
//! because the external event-ingress endpoints (`POST
//! /events/stream_started`, `POST /events/stream_ended`) deserialize the
//! same shape an internal emitter would construct.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ContentKey, EngineId, StreamId, VpnStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    EngineAdded { engine_id: EngineId, at: DateTime<Utc> },
    EngineRemoved { engine_id: EngineId, at: DateTime<Utc> },
    EngineHealthy { engine_id: EngineId, at: DateTime<Utc> },
    EngineUnhealthy { engine_id: EngineId, at: DateTime<Utc> },
    StreamStarted { stream_id: StreamId, content_key: ContentKey, engine_id: EngineId, at: DateTime<Utc> },
    StreamEnded { stream_id: StreamId, content_key: ContentKey, reason: StreamEndReason, at: DateTime<Utc> },
    VpnChanged { name: String, status: VpnStatus, at: DateTime<Utc> },
    VpnPortChanged { name: String, forwarded_port: u16, at: DateTime<Utc> },
    ConfigChanged { at: DateTime<Utc> },
}

/// Why a stream transitioned to `ended`, carried on `stream_ended` so
/// subscribers (and tests asserting P6/P7) can distinguish the cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEndReason {
    StatStopped,
    Idle,
    LoopDetected,
    StaleTimeout,
    UpstreamError,
}

impl OrchestratorEvent {
    /// Name used in log lines and metric labels, matching the casing of
    /// the wire `type` tag.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::EngineAdded { .. } => "engine_added",
            Self::EngineRemoved { .. } => "engine_removed",
            Self::EngineHealthy { .. } => "engine_healthy",
            Self::EngineUnhealthy { .. } => "engine_unhealthy",
            Self::StreamStarted { .. } => "stream_started",
            Self::StreamEnded { .. } => "stream_ended",
            Self::VpnChanged { .. } => "vpn_changed",
            Self::VpnPortChanged { .. } => "vpn_port_changed",
            Self::ConfigChanged { .. } => "config_changed",
        }
    }
}
