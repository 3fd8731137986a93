//! Proxy Core — MPEG-TS (C8, §4.8).
//!
//! One `TsSession` per `content_key` (I8), holding a `RingBuffer` fed by a
//! single dedicated reader task and a set of attached `ClientHandle`s. The
//! reader/heartbeat-sweep split follows the same "one loop per concern"
//! shape `streams::StreamRegistry` uses; cancellation reuses the crate's
//! established `tokio::sync::watch<bool>` idiom (the same one
//! `VpnCoordinator`/`HealthMonitor`/`Autoscaler::start` take as a shutdown
//! signal) rather than pulling in a separate cancellation-token type.

mod ring_buffer;
mod upstream;


use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use tracing::{info, warn};

pub use ring_buffer::RingBuffer;
pub use upstream::{OpenedStream, ReqwestTsUpstream, TsUpstream};

use orchestrator_types::error::{OrchestratorError, Result};
use orchestrator_types::models::{ContentKey, Stream, StreamEndReason};

use crate::fleet::FleetState;
use crate::proxy::common::{ChannelState, ClientHandle, ClientId, ProxyTimings};
use crate::selector::EngineSelector;
use crate::streams::LoopBlacklist;

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(3);
const MAX_READ_ATTEMPTS: u32 = 3;
const HEARTBEAT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Tunables sourced from `OrchestratorConfig` at wiring time (§3 Config).
/// Captured by value rather than held as a live `RwLock`, like
/// `VpnCoordinator`/`EngineSelector` — unlike the Autoscaler's replica
/// counts, none of these are named as hot-patchable in the control surface.
#[derive(Debug, Clone, Copy)]
pub struct TsProxyConfig {
    pub max_chunks: usize,
    pub chunk_ttl: Duration,
    pub catch_up_threshold: u64,
    pub timings: ProxyTimings,
}

pub struct TsSession {
    content_key: ContentKey,
    opened: OpenedStream,
    buffer: Arc<RingBuffer>,
    clients: DashMap<ClientId, Arc<ClientHandle>>,
    state: Mutex<ChannelState>,
    last_disconnect_at: Mutex<Option<Instant>>,
    cancel: tokio::sync::watch::Sender<bool>,
}

impl TsSession {
    /// Initial attach position per §4.8 Client generator: a small backfill
    /// (3 chunks) so playback starts immediately instead of waiting for the
    /// next chunk boundary.
    fn initial_position(&self) -> u64 {
        self.buffer.head_index().saturating_sub(3)
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    fn set_state(&self, state: ChannelState) {
        *self.state.lock() = state;
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

/// Note: stream-row events (`stream_started`/`stream_ended`) are emitted by
/// Fleet State's own mutation path when this core calls `insert_stream`/
/// `end_stream`, so this core holds no direct `EventBus` reference of its
/// own (§4.8's "emit stream_started — direct in-process call" is satisfied
/// by C2, not duplicated here).
pub struct TsProxyCore {
    fleet: Arc<FleetState>,
    selector: Arc<EngineSelector>,
    upstream: Arc<dyn TsUpstream>,
    blacklist: Arc<LoopBlacklist>,
    config: TsProxyConfig,
    sessions: DashMap<ContentKey, Arc<TsSession>>,
}

impl TsProxyCore {
    pub fn new(
        fleet: Arc<FleetState>,
        selector: Arc<EngineSelector>,
        upstream: Arc<dyn TsUpstream>,
        blacklist: Arc<LoopBlacklist>,
        config: TsProxyConfig,
    ) -> Arc<Self> {
        Arc::new(Self { fleet, selector, upstream, blacklist, config, sessions: DashMap::new() })
    }

    pub fn session_state(&self, content_key: &str) -> Option<ChannelState> {
        self.sessions.get(content_key).map(|s| s.state())
    }

    /// §4.8 Admission. Attaches a new client to an existing streaming
    /// session, or opens one from scratch if none exists.
    pub async fn attach(&self, content_key: &str, ip: String, user_agent: String) -> Result<(ClientId, Arc<RingBuffer>, u64)> {
        if self.blacklist.contains(content_key) {
            return Err(OrchestratorError::StreamBlacklisted);
        }

        if let Some(session) = self.sessions.get(content_key) {
            if matches!(session.state(), ChannelState::Streaming | ChannelState::Draining) {
                let session = Arc::clone(&session);
                return Ok(self.attach_client(&session, ip, user_agent));
            }
        }

        self.open_session(content_key, ip, user_agent).await
    }

    async fn open_session(&self, content_key: &str, ip: String, user_agent: String) -> Result<(ClientId, Arc<RingBuffer>, u64)> {
        let engine = self.selector.select(content_key).await?;
        let opened = self.upstream.open(&engine, content_key).await?;

        let stream = Stream::new(
            content_key.to_owned(),
            engine.container_id.clone(),
            opened.playback_session_id.clone(),
            opened.stat_url.clone(),
            opened.command_url.clone(),
        );
        self.fleet.insert_stream(stream).await;

        let (cancel_tx, _) = tokio::sync::watch::channel(false);
        let session = Arc::new(TsSession {
            content_key: content_key.to_owned(),
            opened,
            buffer: Arc::new(RingBuffer::new(self.config.max_chunks, self.config.chunk_ttl)),
            clients: DashMap::new(),
            state: Mutex::new(ChannelState::Initializing),
            last_disconnect_at: Mutex::new(None),
            cancel: cancel_tx,
        });
        self.sessions.insert(content_key.to_owned(), Arc::clone(&session));
        self.spawn_reader(Arc::clone(&session));

        Ok(self.attach_client(&session, ip, user_agent))
    }

    fn attach_client(&self, session: &Arc<TsSession>, ip: String, user_agent: String) -> (ClientId, Arc<RingBuffer>, u64) {
        *session.last_disconnect_at.lock() = None;
        if session.state() == ChannelState::Draining {
            session.set_state(ChannelState::Streaming);
        }
        let position = session.initial_position();
        let client = Arc::new(ClientHandle::new(ip, user_agent, position));
        let client_id = client.client_id;
        session.clients.insert(client_id, client);
        (client_id, Arc::clone(&session.buffer), position)
    }

    pub fn heartbeat(&self, content_key: &str, client_id: ClientId) {
        if let Some(session) = self.sessions.get(content_key) {
            if let Some(client) = session.clients.get(&client_id) {
                client.touch();
            }
        }
    }

    /// Explicit client disconnect (e.g. the HTTP connection closed). Stamps
    /// `last_disconnect_at` immediately rather than waiting for the ghost
    /// sweep to notice a missed heartbeat.
    pub async fn detach(&self, content_key: &str, client_id: ClientId) {
        let Some(session) = self.sessions.get(content_key).map(|s| Arc::clone(&s)) else { return };
        session.clients.remove(&client_id);
        if session.clients.is_empty() {
            self.drain_if_idle(&session).await;
        }
    }

    /// Reads the next chunk for `client_id`, applying the catch-up jump if
    /// the client fell more than `catch_up_threshold` chunks behind.
    pub fn next_chunk(&self, content_key: &str, client_id: ClientId) -> Option<bytes::Bytes> {
        let session = self.sessions.get(content_key)?;
        let client = session.clients.get(&client_id)?;
        let mut position = client.buffer_position();
        let head = session.buffer.head_index();
        if head.saturating_sub(position) > self.config.catch_up_threshold {
            position = head.saturating_sub(3);
            client.catchup_jumps.fetch_add(1, Ordering::Relaxed);
        }
        let chunk = session.buffer.get(position + 1)?;
        client.set_buffer_position(position + 1);
        client.add_bytes_sent(chunk.len() as u64);
        Some(chunk)
    }

    fn spawn_reader(self: &Arc<Self>, session: Arc<TsSession>) {
        let core = Arc::clone(self);
        tokio::spawn(async move { core.run_reader(session).await });
    }

    async fn run_reader(&self, session: Arc<TsSession>) {
        let mut cancel_rx = session.cancel.subscribe();
        let mut attempt = 0u32;
        loop {
            match self.upstream.open_byte_stream(&session.opened.playback_url).await {
                Ok(mut byte_stream) => {
                    attempt = 0;
                    let mut first_chunk = true;
                    loop {
                        tokio::select! {
                            _ = cancel_rx.changed() => {
                                session.set_state(ChannelState::Stopped);
                                return;
                            }
                            next = byte_stream.next() => {
                                match next {
                                    Some(Ok(bytes)) => {
                                        session.buffer.push(&bytes);
                                        if first_chunk {
                                            session.set_state(ChannelState::Streaming);
                                            first_chunk = false;
                                        }
                                    }
                                    Some(Err(e)) => {
                                        warn!(content_key = %session.content_key, error = %e, "upstream read error");
                                        break;
                                    }
                                    None => break,
                                }
                            }
                        }
                    }
                },
                Err(e) => warn!(content_key = %session.content_key, error = %e, "upstream open_byte_stream failed"),
            }

            if self.drain_if_idle(&session).await {
                return;
            }

            attempt += 1;
            if attempt > MAX_READ_ATTEMPTS {
                self.teardown(&session, StreamEndReason::UpstreamError).await;
                return;
            }
            tokio::time::sleep((BACKOFF_BASE * attempt).min(BACKOFF_CAP)).await;
        }
    }

    /// Checks whether the channel should give up entirely (no clients left
    /// and the shutdown grace has elapsed) rather than reconnecting the
    /// upstream reader.
    async fn drain_if_idle(&self, session: &Arc<TsSession>) -> bool {
        if session.clients.is_empty() {
            let now = Instant::now();
            let disconnect_at = *session.last_disconnect_at.lock().get_or_insert(now);
            if now.duration_since(disconnect_at) >= self.config.timings.channel_shutdown_delay {
                self.teardown(session, StreamEndReason::Idle).await;
                return true;
            }
            session.set_state(ChannelState::Draining);
        }
        false
    }

    async fn teardown(&self, session: &Arc<TsSession>, reason: StreamEndReason) {
        session.set_state(ChannelState::Stopped);
        let _ = session.cancel.send(true);
        if let Err(e) = self.stop_upstream(session).await {
            warn!(content_key = %session.content_key, error = %e, "command_url stop failed during teardown");
        }
        if let Some(stream) = self.fleet.started_stream_for_key(&session.content_key).await {
            self.fleet.end_stream(&stream.stream_id, reason).await;
        }
        self.sessions.remove(&session.content_key);
    }

    async fn stop_upstream(&self, session: &Arc<TsSession>) -> Result<()> {
        let client = reqwest::Client::new();
        client.get(format!("{}?method=stop", session.opened.command_url)).send().await.map_err(OrchestratorError::TransientNetwork)?;
        Ok(())
    }

    /// §4.8 Heartbeats: periodic ghost sweep, spawned alongside the
    /// session's reader so a channel with no traffic still gets swept.
    pub fn start_heartbeat_sweep(self: &Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(HEARTBEAT_SWEEP_INTERVAL) => {
                        core.sweep_ghosts().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("ts proxy heartbeat sweep shutting down");
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn sweep_ghosts(&self) {
        let content_keys: Vec<ContentKey> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for content_key in content_keys {
            let Some(session) = self.sessions.get(&content_key) else { continue };
            let session = Arc::clone(&session);
            let ghosts: Vec<ClientId> = session
                .clients
                .iter()
                .filter(|c| c.is_ghost(self.config.timings.ghost_timeout))
                .map(|c| *c.key())
                .collect();
            for client_id in ghosts {
                session.clients.remove(&client_id);
            }
            if session.clients.is_empty() {
                self.drain_if_idle(&session).await;
            }
        }
    }
}
