//! Proxy Core — HLS (C9, §4.9).
//!
//! Structurally a sibling of `proxy::ts`: one `HlsSession` per `content_key`,
//! a single background fetcher instead of a byte-stream reader, the same
//! `tokio::sync::watch<bool>` cancellation idiom, and the same
//! admission/heartbeat/teardown shape. The one real divergence from C8 is
//! the admission rule itself — §4.9 requires the existence check to run
//! *before* engine selection so a live channel's `playback_session_id` is
//! never invalidated by a refresh-triggered re-select.

mod segment_buffer;
mod upstream;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

pub use segment_buffer::SegmentBuffer;
pub use upstream::{HlsUpstream, ReqwestHlsUpstream};

use orchestrator_types::error::{OrchestratorError, Result};
use orchestrator_types::models::{ContentKey, Stream, StreamEndReason};

use crate::fleet::FleetState;
use crate::proxy::common::{ChannelState, ClientHandle, ClientId, ProxyTimings};
use crate::proxy::ts::OpenedStream;
use crate::selector::EngineSelector;
use crate::streams::LoopBlacklist;

const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_SEGMENT_DURATION: f32 = 6.0;
const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(3);
const MAX_FETCH_ATTEMPTS: u32 = 3;
const HEARTBEAT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Tunables sourced from `OrchestratorConfig` (§3 Config), same treatment as
/// `proxy::ts::TsProxyConfig`.
#[derive(Debug, Clone, Copy)]
pub struct HlsProxyConfig {
    pub max_segments: usize,
    pub window_size: usize,
    pub fetch_interval_multiplier: f64,
    pub timings: ProxyTimings,
}

pub struct HlsSession {
    content_key: ContentKey,
    opened: OpenedStream,
    buffer: Arc<SegmentBuffer>,
    clients: DashMap<ClientId, Arc<ClientHandle>>,
    state: Mutex<ChannelState>,
    last_disconnect_at: Mutex<Option<Instant>>,
    cancel: tokio::sync::watch::Sender<bool>,
    /// Proxy-assigned, gapless output sequence — distinct from the engine's
    /// own `#EXT-X-MEDIA-SEQUENCE`, which can reset or skip across engine
    /// restarts.
    next_seq: AtomicU64,
    /// Absolute engine-side segment index (`media_sequence + i`) of the last
    /// segment fetched; `u64::MAX` means none yet. De-duplicates segments
    /// across overlapping sliding-window manifest refreshes.
    last_engine_index: AtomicU64,
    target_duration: Mutex<f32>,
}

impl HlsSession {
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

pub struct HlsProxyCore {
    fleet: Arc<FleetState>,
    selector: Arc<EngineSelector>,
    upstream: Arc<dyn HlsUpstream>,
    blacklist: Arc<LoopBlacklist>,
    config: HlsProxyConfig,
    sessions: DashMap<ContentKey, Arc<HlsSession>>,
}

impl HlsProxyCore {
    pub fn new(
        fleet: Arc<FleetState>,
        selector: Arc<EngineSelector>,
        upstream: Arc<dyn HlsUpstream>,
        blacklist: Arc<LoopBlacklist>,
        config: HlsProxyConfig,
    ) -> Arc<Self> {
        Arc::new(Self { fleet, selector, upstream, blacklist, config, sessions: DashMap::new() })
    }

    pub fn session_state(&self, content_key: &str) -> Option<ChannelState> {
        self.sessions.get(content_key).map(|s| s.state())
    }

    /// §4.9 Admission. A channel that already exists is reused unconditionally
    /// — no re-selection, no re-request to the engine — even mid-`Initializing`,
    /// since the whole point is to never run engine selection twice for the
    /// same content key while a player is polling for its manifest.
    pub async fn manifest(&self, content_key: &str, ip: String, user_agent: String) -> Result<(ClientId, String)> {
        if self.blacklist.contains(content_key) {
            return Err(OrchestratorError::StreamBlacklisted);
        }

        if let Some(session) = self.sessions.get(content_key) {
            let session = Arc::clone(&session);
            let client_id = self.attach_client(&session, ip, user_agent);
            return Ok((client_id, self.render_manifest(&session)));
        }

        self.open_session(content_key, ip, user_agent).await
    }

    async fn open_session(&self, content_key: &str, ip: String, user_agent: String) -> Result<(ClientId, String)> {
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
        let session = Arc::new(HlsSession {
            content_key: content_key.to_owned(),
            opened,
            buffer: Arc::new(SegmentBuffer::new(self.config.max_segments)),
            clients: DashMap::new(),
            state: Mutex::new(ChannelState::Initializing),
            last_disconnect_at: Mutex::new(None),
            cancel: cancel_tx,
            next_seq: AtomicU64::new(0),
            last_engine_index: AtomicU64::new(u64::MAX),
            target_duration: Mutex::new(DEFAULT_SEGMENT_DURATION),
        });
        self.sessions.insert(content_key.to_owned(), Arc::clone(&session));
        self.spawn_fetcher(Arc::clone(&session));

        let client_id = self.attach_client(&session, ip, user_agent);
        Ok((client_id, self.render_manifest(&session)))
    }

    fn attach_client(&self, session: &Arc<HlsSession>, ip: String, user_agent: String) -> ClientId {
        *session.last_disconnect_at.lock() = None;
        if session.state() == ChannelState::Draining {
            session.set_state(ChannelState::Streaming);
        }
        let client = Arc::new(ClientHandle::new(ip, user_agent, 0));
        let client_id = client.client_id;
        session.clients.insert(client_id, client);
        client_id
    }

    /// Renders the manifest covering the current window (§4.9 "Segment
    /// fetcher"), rewriting segment URIs to `/hls/{content_key}/segment/{seq}.ts`
    /// so playback is served from this proxy's buffer, never the engine
    /// directly.
    fn render_manifest(&self, session: &Arc<HlsSession>) -> String {
        let target_duration = session.target_duration.lock().ceil().max(1.0) as u64;
        let window = session.buffer.window(self.config.window_size);
        let media_sequence = window.first().map_or(0, |(seq, _)| *seq);

        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str("#EXT-X-VERSION:3\n");
        out.push_str(&format!("#EXT-X-TARGETDURATION:{target_duration}\n"));
        out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{media_sequence}\n"));
        for (seq, duration) in window {
            out.push_str(&format!("#EXTINF:{duration:.3},\n"));
            out.push_str(&format!("/hls/{}/segment/{seq}.ts\n", session.content_key));
        }
        out
    }

    pub fn heartbeat(&self, content_key: &str, client_id: ClientId) {
        if let Some(session) = self.sessions.get(content_key) {
            if let Some(client) = session.clients.get(&client_id) {
                client.touch();
            }
        }
    }

    /// Renders the current manifest for an already-attached client without
    /// creating a new one, for the HTTP layer to reuse on a player's
    /// repeat polls once it has echoed back a `client_id` from the first
    /// response. Returns `None` if either the session or the client is
    /// gone, so the caller can fall back to `manifest()` (fresh attach).
    pub fn current_manifest(&self, content_key: &str, client_id: ClientId) -> Option<String> {
        let session = self.sessions.get(content_key)?;
        session.clients.get(&client_id)?.touch();
        Some(self.render_manifest(&session))
    }

    pub async fn detach(&self, content_key: &str, client_id: ClientId) {
        let Some(session) = self.sessions.get(content_key).map(|s| Arc::clone(&s)) else { return };
        session.clients.remove(&client_id);
        if session.clients.is_empty() {
            self.drain_if_idle(&session).await;
        }
    }

    pub fn segment(&self, content_key: &str, seq: u64) -> Option<bytes::Bytes> {
        self.sessions.get(content_key)?.buffer.get(seq)
    }

    fn spawn_fetcher(self: &Arc<Self>, session: Arc<HlsSession>) {
        let core = Arc::clone(self);
        tokio::spawn(async move { core.run_fetcher(session).await });
    }

    async fn run_fetcher(&self, session: Arc<HlsSession>) {
        let mut cancel_rx = session.cancel.subscribe();
        let mut attempt = 0u32;
        let mut interval = DEFAULT_FETCH_INTERVAL;
        loop {
            tokio::select! {
                _ = cancel_rx.changed() => {
                    session.set_state(ChannelState::Stopped);
                    return;
                }
                () = tokio::time::sleep(interval) => {}
            }

            match self.fetch_once(&session).await {
                Ok(fetched_new) => {
                    attempt = 0;
                    let target = *session.target_duration.lock();
                    interval = Duration::from_secs_f64(f64::from(target) * self.config.fetch_interval_multiplier);
                    if fetched_new {
                        session.set_state(ChannelState::Streaming);
                    }
                }
                Err(e) => {
                    warn!(content_key = %session.content_key, error = %e, "hls manifest fetch failed");
                    attempt += 1;
                    if attempt > MAX_FETCH_ATTEMPTS {
                        self.teardown(&session, StreamEndReason::UpstreamError).await;
                        return;
                    }
                    tokio::time::sleep((BACKOFF_BASE * attempt).min(BACKOFF_CAP)).await;
                }
            }

            if self.drain_if_idle(&session).await {
                return;
            }
        }
    }

    /// Fetches the engine's manifest once, pulling down any segment beyond
    /// the last absolute engine index already consumed. Returns whether at
    /// least one new segment was fetched.
    async fn fetch_once(&self, session: &Arc<HlsSession>) -> Result<bool> {
        let manifest_text = self.upstream.fetch_manifest(&session.opened.playback_url).await?;
        let playlist = m3u8_rs::parse_playlist_res(manifest_text.as_bytes())
            .map_err(|_| OrchestratorError::Unknown("invalid hls manifest from engine".into()))?;
        let media = match playlist {
            m3u8_rs::Playlist::MediaPlaylist(mp) => mp,
            m3u8_rs::Playlist::MasterPlaylist(_) => {
                return Err(OrchestratorError::Unknown("engine returned a master playlist, expected a media playlist".into()));
            }
        };
        let base = url::Url::parse(&session.opened.playback_url).map_err(|e| OrchestratorError::Unknown(e.to_string()))?;

        let mut fetched_any = false;
        for (i, seg) in media.segments.iter().enumerate() {
            let engine_index = media.media_sequence + i as u64;
            let last = session.last_engine_index.load(Ordering::Acquire);
            if last != u64::MAX && engine_index <= last {
                continue;
            }

            let segment_url = base.join(&seg.uri).map_err(|e| OrchestratorError::Unknown(e.to_string()))?;
            let data = self.upstream.fetch_segment(segment_url.as_str()).await?;
            let seq = session.next_seq.fetch_add(1, Ordering::AcqRel);
            session.buffer.push(seq, data, seg.duration);
            session.last_engine_index.store(engine_index, Ordering::Release);
            *session.target_duration.lock() = seg.duration;
            fetched_any = true;
        }
        Ok(fetched_any)
    }

    async fn drain_if_idle(&self, session: &Arc<HlsSession>) -> bool {
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

    async fn teardown(&self, session: &Arc<HlsSession>, reason: StreamEndReason) {
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

    async fn stop_upstream(&self, session: &Arc<HlsSession>) -> Result<()> {
        let client = reqwest::Client::new();
        client.get(format!("{}?method=stop", session.opened.command_url)).send().await.map_err(OrchestratorError::TransientNetwork)?;
        Ok(())
    }

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
                            info!("hls proxy heartbeat sweep shutting down");
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
            let ghosts: Vec<ClientId> =
                session.clients.iter().filter(|c| c.is_ghost(self.config.timings.ghost_timeout)).map(|c| *c.key()).collect();
            for client_id in ghosts {
                session.clients.remove(&client_id);
            }
            if session.clients.is_empty() {
                self.drain_if_idle(&session).await;
            }
        }
    }
}
