//! Stream Registry & Loop Detector (C7, §4.7).
//!
//! Three independent loops plus a cleanup sweep, all reading/writing
//! through Fleet State's (C2) single stream write path. Grounded on the
//! teacher's `scheduler.rs` multi-loop-starter shape: each concern gets
//! its own `tokio::spawn`ed loop rather than one loop doing everything,
//! so a slow stat fetch on one loop never delays the loop-detector tick.

mod blacklist;
mod upstream;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

pub use blacklist::{BlacklistEntry, LoopBlacklist};
pub use upstream::{EngineUpstreamClient, ReqwestUpstreamClient, StatSnapshot};

use orchestrator_types::error::Result;
use orchestrator_types::models::{Stream, StreamEndReason, StreamStatus};

use crate::fleet::FleetState;
use crate::health::HealthMonitor;

pub struct StreamRegistryConfig {
    pub collect_interval: Duration,
    pub stale_check_interval: Duration,
    pub stream_timeout: chrono::Duration,
    pub loop_check_interval: Duration,
    pub loop_threshold: chrono::Duration,
    pub cleanup_interval: Duration,
    pub ended_retention: chrono::Duration,
    pub blacklist_retention_minutes: u64,
}

pub struct StreamRegistry {
    fleet: Arc<FleetState>,
    health: Arc<HealthMonitor>,
    upstream: Arc<dyn EngineUpstreamClient>,
    blacklist: Arc<LoopBlacklist>,
    config: StreamRegistryConfig,
}

impl StreamRegistry {
    pub fn new(
        fleet: Arc<FleetState>,
        health: Arc<HealthMonitor>,
        upstream: Arc<dyn EngineUpstreamClient>,
        blacklist: Arc<LoopBlacklist>,
        config: StreamRegistryConfig,
    ) -> Arc<Self> {
        Arc::new(Self { fleet, health, upstream, blacklist, config })
    }

    pub fn blacklist(&self) -> &LoopBlacklist {
        &self.blacklist
    }

    /// Spawns the four background loops (§4.7), returning their handles so
    /// the caller's scheduler can join/abort them on shutdown.
    pub fn start(self: &Arc<Self>, shutdown: tokio::sync::watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.spawn_loop("stats_collector", self.config.collect_interval, shutdown.clone(), {
                let registry = Arc::clone(self);
                move || {
                    let registry = Arc::clone(&registry);
                    async move { registry.collect_stats().await }
                }
            }),
            self.spawn_loop("stale_detector", self.config.stale_check_interval, shutdown.clone(), {
                let registry = Arc::clone(self);
                move || {
                    let registry = Arc::clone(&registry);
                    async move { registry.detect_stale().await }
                }
            }),
            self.spawn_loop("loop_detector", self.config.loop_check_interval, shutdown.clone(), {
                let registry = Arc::clone(self);
                move || {
                    let registry = Arc::clone(&registry);
                    async move { registry.detect_loops().await }
                }
            }),
            self.spawn_loop("cleanup", self.config.cleanup_interval, shutdown, {
                let registry = Arc::clone(self);
                move || {
                    let registry = Arc::clone(&registry);
                    async move { registry.cleanup().await }
                }
            }),
        ]
    }

    fn spawn_loop<F, Fut>(
        &self,
        name: &'static str,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
        make_tick: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {
                        make_tick().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!(loop_name = name, "stream registry loop shutting down");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Polls every started stream's `stat_url` (§4.7 stats collector).
    async fn collect_stats(&self) {
        let started = self.fleet.streams_with_status(StreamStatus::Started).await;
        for stream in started {
            match self.upstream.fetch_stats(&stream.stat_url).await {
                Ok(snapshot) => self.apply_snapshot(&stream, snapshot).await,
                Err(e) => warn!(stream_id = %stream.stream_id, error = %e, "stat fetch failed"),
            }
        }
    }

    async fn apply_snapshot(&self, stream: &Stream, snapshot: StatSnapshot) {
        let unknown_session = snapshot.playback_session_id != stream.playback_session_id;
        if snapshot.stopped || unknown_session {
            self.end_stream(stream, StreamEndReason::StatStopped).await;
            return;
        }

        self.fleet
            .update_stream(&stream.stream_id, |s| {
                s.metrics.speed_down = snapshot.speed_down;
                s.metrics.speed_up = snapshot.speed_up;
                s.metrics.peers = snapshot.peers;
                s.metrics.downloaded = snapshot.downloaded;
                s.metrics.uploaded = snapshot.uploaded;
                if snapshot.live_last.is_some() {
                    s.live_last = snapshot.live_last;
                }
            })
            .await;

        if let Some(live_last) = snapshot.live_last {
            self.health.record_data(&stream.engine_id, live_last).await;
        }
    }

    /// Terminates streams with no data movement for `STREAM_TIMEOUT_S`
    /// (§4.7 stale stream detector).
    async fn detect_stale(&self) {
        let now = Utc::now();
        let started = self.fleet.streams_with_status(StreamStatus::Started).await;
        for stream in started {
            let reference = stream.live_last.unwrap_or(stream.started_at);
            if now - reference > self.config.stream_timeout {
                self.end_stream(&stream, StreamEndReason::StaleTimeout).await;
            }
        }
    }

    /// Compares `now - live_last` to `STREAM_LOOP_THRESHOLD_S`; on
    /// exceedance, stops the upstream session, ends the stream, and
    /// blacklists its `content_key` (§4.7 loop detector, worked scenario 5).
    async fn detect_loops(&self) {
        let now = Utc::now();
        let started = self.fleet.streams_with_status(StreamStatus::Started).await;
        for stream in started {
            let Some(live_last) = stream.live_last else { continue };
            if now - live_last <= self.config.loop_threshold {
                continue;
            }
            if let Err(e) = self.upstream.stop(&stream.command_url).await {
                warn!(stream_id = %stream.stream_id, error = %e, "loop-detector stop call failed");
            }
            self.blacklist.insert(stream.content_key.clone());
            self.end_stream(&stream, StreamEndReason::LoopDetected).await;
        }
    }

    async fn end_stream(&self, stream: &Stream, reason: StreamEndReason) {
        self.fleet.end_stream(&stream.stream_id, reason).await;
    }

    /// Evicts retained `ended` streams and, if configured, expired
    /// blacklist entries (§4.7 cleanup, §3 LoopBlacklist retention).
    async fn cleanup(&self) {
        let evicted = self.fleet.evict_old_ended_streams(self.config.ended_retention).await;
        if evicted > 0 {
            info!(evicted, "cleaned up retained ended streams");
        }
        if self.config.blacklist_retention_minutes > 0 {
            let retention = chrono::Duration::minutes(self.config.blacklist_retention_minutes as i64);
            self.blacklist.evict_expired(retention);
        }
    }
}
