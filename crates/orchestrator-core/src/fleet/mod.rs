//! Fleet State (C2) — the single source of truth for engine and stream
//! records.
//!
//! Mirrors the teacher's `AppStateInner` shape (many managers behind
//! `Arc`, an async constructor) and `modules/repository.rs`'s
//! repository-owns-the-lock discipline: typed read accessors, mutation
//! through one write path per entity class, every mutation emitting a C10
//! event after its lock is released (§4.2).

mod snapshot;


use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Notify, RwLock};
use tracing::{info, warn};

use orchestrator_types::error::Result;
use orchestrator_types::models::{
    ContentKey, Engine, EngineId, OrchestratorEvent, Stream, StreamEndReason, StreamId, StreamStatus,
};

use crate::container::ContainerDriver;
use crate::events::EventBus;

pub use snapshot::FleetSnapshot;

/// Authoritative in-memory map of engines and streams, backed by a
/// debounced JSON snapshot on disk.
pub struct FleetState {
    owner_id: String,
    driver: Arc<dyn ContainerDriver>,
    events: Arc<EventBus>,
    engines: RwLock<HashMap<EngineId, Engine>>,
    streams: RwLock<HashMap<StreamId, Stream>>,
    snapshot_path: String,
    snapshot_debounce: std::time::Duration,
    dirty: Notify,
}

impl FleetState {
    pub fn new(
        owner_id: String,
        driver: Arc<dyn ContainerDriver>,
        events: Arc<EventBus>,
        snapshot_path: String,
        snapshot_debounce: std::time::Duration,
    ) -> Self {
        Self {
            owner_id,
            driver,
            events,
            engines: RwLock::new(HashMap::new()),
            streams: RwLock::new(HashMap::new()),
            snapshot_path,
            snapshot_debounce,
            dirty: Notify::new(),
        }
    }

    /// Reconstructs state by merging the on-disk snapshot with a fresh
    /// `list_managed()` (§6 "Persisted state"). Called once at startup.
    pub async fn reindex(&self) -> Result<()> {
        let restored = snapshot::load(&self.snapshot_path).unwrap_or_default();
        let managed = self.driver.list_managed(&self.owner_id).await?;

        let mut engines = self.engines.write().await;
        engines.clear();
        for container in managed {
            // Live `list_managed()` inspection is authoritative for port data —
            // the snapshot only fills in what the live container doesn't carry
            // (`vpn_binding`) or, for the optional ports, what a pre-`https`/
            // `p2p` snapshot predates (§6 "Persisted state").
            let mut engine = Engine::new(
                container.id.clone(),
                container.name.clone(),
                "127.0.0.1".to_owned(),
                container.ports.http.host_port,
            );
            engine.https_port = container.ports.https.map(|p| p.host_port);
            engine.p2p_port = container.ports.p2p.map(|p| p.host_port);
            engine.labels = container.labels.clone();
            engine.forwarded = container.labels.get("acestream.forwarded").map(String::as_str)
                == Some("true");
            engine.active_template_id = container.labels.get("acestream.template_id").cloned();
            if let Some(restored_engine) = restored.engines.iter().find(|e| e.container_id == engine.container_id) {
                engine.vpn_binding = restored_engine.vpn_binding.clone();
                if engine.https_port.is_none() {
                    engine.https_port = restored_engine.https_port;
                }
                if engine.p2p_port.is_none() {
                    engine.p2p_port = restored_engine.p2p_port;
                }
            }
            engines.insert(engine.container_id.clone(), engine);
        }
        let engine_count = engines.len();
        drop(engines);

        let mut streams = self.streams.write().await;
        streams.clear();
        for stream in restored.streams {
            streams.insert(stream.stream_id, stream);
        }
        let stream_count = streams.len();
        drop(streams);

        info!(engine_count, stream_count, "fleet state reindexed");
        Ok(())
    }

    // ---- Engines -----------------------------------------------------

    pub async fn insert_engine(&self, engine: Engine) {
        let engine_id = engine.container_id.clone();
        self.engines.write().await.insert(engine_id.clone(), engine);
        self.mark_dirty();
        self.events.emit(OrchestratorEvent::EngineAdded { engine_id, at: Utc::now() });
    }

    pub async fn remove_engine(&self, id: &str) -> Option<Engine> {
        let removed = self.engines.write().await.remove(id);
        if removed.is_some() {
            self.mark_dirty();
            self.events
                .emit(OrchestratorEvent::EngineRemoved { engine_id: id.to_owned(), at: Utc::now() });
        }
        removed
    }

    pub async fn get_engine(&self, id: &str) -> Option<Engine> {
        self.engines.read().await.get(id).cloned()
    }

    pub async fn list_engines(&self) -> Vec<Engine> {
        self.engines.read().await.values().cloned().collect()
    }

    /// Applies `f` to the engine under the write lock and returns whether
    /// it existed. Used for health transitions, forwarded-designation, and
    /// port assignment, keeping each mutation on the single write path.
    pub async fn update_engine(&self, id: &str, f: impl FnOnce(&mut Engine)) -> bool {
        let mut engines = self.engines.write().await;
        let Some(engine) = engines.get_mut(id) else { return false };
        f(engine);
        true
    }

    pub async fn has_forwarded_engine(&self, vpn_name: &str) -> bool {
        self.engines
            .read()
            .await
            .values()
            .any(|e| e.forwarded && e.vpn_binding.as_deref() == Some(vpn_name))
    }

    // ---- Streams -------------------------------------------------------

    pub async fn insert_stream(&self, stream: Stream) {
        let (stream_id, content_key, engine_id) =
            (stream.stream_id, stream.content_key.clone(), stream.engine_id.clone());
        self.streams.write().await.insert(stream_id, stream);
        self.mark_dirty();
        self.events.emit(OrchestratorEvent::StreamStarted {
            stream_id,
            content_key,
            engine_id,
            at: Utc::now(),
        });
    }

    pub async fn get_stream(&self, id: &StreamId) -> Option<Stream> {
        self.streams.read().await.get(id).cloned()
    }

    /// Finds a *started* stream for `content_key`, i.e. an existing
    /// Session the proxy's admission path can attach to (§4.8 step 2).
    pub async fn started_stream_for_key(&self, content_key: &str) -> Option<Stream> {
        self.streams
            .read()
            .await
            .values()
            .find(|s| s.content_key == content_key && s.is_started())
            .cloned()
    }

    pub async fn streams_with_status(&self, status: StreamStatus) -> Vec<Stream> {
        self.streams.read().await.values().filter(|s| s.status == status).cloned().collect()
    }

    pub async fn update_stream(&self, id: &StreamId, f: impl FnOnce(&mut Stream)) -> bool {
        let mut streams = self.streams.write().await;
        let Some(stream) = streams.get_mut(id) else { return false };
        f(stream);
        true
    }

    /// Transitions a stream to `ended` exactly once (P6) and emits
    /// `stream_ended`. No-op (returns `None`) if already ended or unknown.
    pub async fn end_stream(&self, id: &StreamId, reason: StreamEndReason) -> Option<ContentKey> {
        let mut streams = self.streams.write().await;
        let stream = streams.get_mut(id)?;
        if stream.status == StreamStatus::Ended {
            return None;
        }
        stream.mark_ended();
        let content_key = stream.content_key.clone();
        drop(streams);

        self.mark_dirty();
        self.events.emit(OrchestratorEvent::StreamEnded {
            stream_id: *id,
            content_key: content_key.clone(),
            reason,
            at: Utc::now(),
        });
        Some(content_key)
    }

    /// Removes `ended` streams older than `retention` (§4.7 cleanup).
    pub async fn evict_old_ended_streams(&self, retention: chrono::Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let mut streams = self.streams.write().await;
        let before = streams.len();
        streams.retain(|_, s| !(s.status == StreamStatus::Ended && s.ended_at.is_some_and(|t| t < cutoff)));
        before - streams.len()
    }

    // ---- Derived values --------------------------------------------------

    /// `engine_load(e)` = count of started streams with `engine_id=e`.
    pub async fn engine_load(&self, engine_id: &str) -> u32 {
        self.streams
            .read()
            .await
            .values()
            .filter(|s| s.engine_id == engine_id && s.is_started())
            .count() as u32
    }

    /// `capacity_used` = count of *unique engine ids* across started
    /// streams, never the total stream count (P1, §6).
    pub async fn capacity_used(&self) -> usize {
        let streams = self.streams.read().await;
        let mut engine_ids: Vec<&str> =
            streams.values().filter(|s| s.is_started()).map(|s| s.engine_id.as_str()).collect();
        engine_ids.sort_unstable();
        engine_ids.dedup();
        engine_ids.len()
    }

    pub async fn capacity_total(&self) -> usize {
        self.engines.read().await.len()
    }

    pub async fn free_count(&self) -> u32 {
        let loads = self.loads_by_engine().await;
        let engines = self.engines.read().await;
        engines.keys().filter(|id| loads.get(id.as_str()).copied().unwrap_or(0) == 0).count() as u32
    }

    async fn loads_by_engine(&self) -> HashMap<String, u32> {
        let mut loads = HashMap::new();
        for stream in self.streams.read().await.values().filter(|s| s.is_started()) {
            *loads.entry(stream.engine_id.clone()).or_insert(0) += 1;
        }
        loads
    }

    fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    /// Runs the debounced snapshot writer until cancelled. Intended to be
    /// `tokio::spawn`ed once from the server's scheduler, mirroring the
    /// teacher's `scheduler`-module loop-starter pattern.
    pub async fn run_snapshot_writer(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = self.dirty.notified() => {
                    tokio::time::sleep(self.snapshot_debounce).await;
                    if let Err(e) = self.write_snapshot().await {
                        warn!(error = %e, "failed to write fleet snapshot");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = self.write_snapshot().await;
                        return;
                    }
                }
            }
        }
    }

    async fn write_snapshot(&self) -> Result<()> {
        let engines = self.engines.read().await.values().cloned().collect();
        let streams = self.streams_with_status(StreamStatus::Started).await;
        let snap = FleetSnapshot { engines, streams, lookahead_layer: None, updated_at: Utc::now() };
        snapshot::save(&self.snapshot_path, &snap).await
    }
}
