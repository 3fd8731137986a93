//! Shared proxy-internal vocabulary (§3 Client, §4.8/§4.9 heartbeat rules).
//!
//! Mirrors the teacher's `proxy/common/header_constants.rs` for naming
//! fixed header pairs and its `CacheEntry`-with-timestamp shape (seen in
//! `proxy/signature_cache/mod.rs`) for tracking per-client liveness without
//! a background actor per client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use uuid::Uuid;

/// The engine refuses to negotiate compression; asking for anything else
/// makes it deliver nothing (§4.8 Client generator).
pub const ACCEPT_ENCODING_IDENTITY: (&str, &str) = ("Accept-Encoding", "identity");

pub type ClientId = Uuid;

/// Heartbeat/shutdown timings shared by TS and HLS, sourced from
/// `OrchestratorConfig` at wiring time rather than hardcoded — the same
/// "capture once as plain fields" treatment `VpnCoordinator`/`EngineSelector`
/// give their own interval/window parameters.
#[derive(Debug, Clone, Copy)]
pub struct ProxyTimings {
    pub ghost_timeout: Duration,
    pub channel_shutdown_delay: Duration,
}

/// §3 Session `state` field, shared verbatim between TS and HLS channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Initializing,
    Streaming,
    Draining,
    Stopped,
}

/// A single attached viewer (§3 Client). `buffer_position` is the chunk
/// index (TS) or segment sequence (HLS) the client has last been served;
/// the two proxies interpret it differently but track it the same way.
pub struct ClientHandle {
    pub client_id: ClientId,
    pub ip: String,
    pub user_agent: String,
    pub connected_at: Instant,
    last_heartbeat_at: Mutex<Instant>,
    buffer_position: AtomicU64,
    bytes_sent: AtomicU64,
    pub catchup_jumps: AtomicU64,
}

impl ClientHandle {
    pub fn new(ip: String, user_agent: String, initial_position: u64) -> Self {
        let now = Instant::now();
        Self {
            client_id: Uuid::new_v4(),
            ip,
            user_agent,
            connected_at: now,
            last_heartbeat_at: Mutex::new(now),
            buffer_position: AtomicU64::new(initial_position),
            bytes_sent: AtomicU64::new(0),
            catchup_jumps: AtomicU64::new(0),
        }
    }

    pub fn touch(&self) {
        *self.last_heartbeat_at.lock() = Instant::now();
    }

    /// (I10) `now - last_heartbeat_at > heartbeat_interval_s * ghost_multiplier`.
    pub fn is_ghost(&self, ghost_timeout: Duration) -> bool {
        self.last_heartbeat_at.lock().elapsed() > ghost_timeout
    }

    pub fn buffer_position(&self) -> u64 {
        self.buffer_position.load(Ordering::Acquire)
    }

    pub fn set_buffer_position(&self, position: u64) {
        self.buffer_position.store(position, Ordering::Release);
    }

    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}
