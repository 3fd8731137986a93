//! Health Monitor (C4).
//!
//! Direct generalization of `proxy/health/monitor.rs`'s `AccountHealth`
//! registry: per-engine atomic consecutive-failure counters behind a
//! `DashMap`, a single background loop instead of per-account recovery
//! timers (engines don't get a cooldown-based auto-recovery — health here
//! is a live probe result, not a disable/enable flag).

pub(crate) mod prober;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

pub use prober::{EngineProber, ReqwestEngineProber};

use orchestrator_types::models::{EngineId, HealthStatus, OrchestratorEvent};

use crate::container::ContainerDriver;
use crate::events::EventBus;
use crate::fleet::FleetState;
use crate::vpn::VpnCoordinator;

const FAILURE_THRESHOLD: u32 = 3;

#[derive(Default)]
struct EngineCounter {
    consecutive_failures: AtomicU32,
    unhealthy_since: Mutex<Option<Instant>>,
}

/// Per-engine health tracking plus the probe loop that feeds it (§4.4).
pub struct HealthMonitor {
    fleet: Arc<FleetState>,
    events: Arc<EventBus>,
    driver: Arc<dyn ContainerDriver>,
    vpn: Arc<VpnCoordinator>,
    prober: Arc<dyn EngineProber>,
    counters: DashMap<EngineId, EngineCounter>,
    probe_interval: Duration,
    unhealthy_grace: Duration,
}

impl HealthMonitor {
    pub fn new(
        fleet: Arc<FleetState>,
        events: Arc<EventBus>,
        driver: Arc<dyn ContainerDriver>,
        vpn: Arc<VpnCoordinator>,
        prober: Arc<dyn EngineProber>,
        probe_interval: Duration,
        unhealthy_grace: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            fleet,
            events,
            driver,
            vpn,
            prober,
            counters: DashMap::new(),
            probe_interval,
            unhealthy_grace,
        })
    }

    /// Runs the probe loop until `shutdown` fires, mirroring
    /// `HealthMonitor::start_recovery_task`'s `tokio::select!` shape.
    pub fn start(self: &Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(monitor.probe_interval) => {
                        monitor.probe_all().await;
                        monitor.evict_unhealthy_beyond_grace().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("health monitor shutting down");
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn probe_all(&self) {
        let engines = self.fleet.list_engines().await;
        let futures = engines.into_iter().map(|engine| async move {
            let result = self.prober.probe(&engine).await;
            (engine.container_id, result)
        });
        let results: Vec<_> = futures::future::join_all(futures).await;
        for (engine_id, result) in results {
            match result {
                Ok(true) => self.record_success(&engine_id).await,
                Ok(false) | Err(_) => self.record_failure(&engine_id).await,
            }
        }
    }

    pub async fn record_success(&self, engine_id: &str) {
        let counter = self.counters.entry(engine_id.to_owned()).or_default();
        counter.consecutive_failures.store(0, Ordering::SeqCst);
        *counter.unhealthy_since.lock() = None;
        drop(counter);

        let now = Utc::now();
        let mut became_healthy = false;
        self.fleet
            .update_engine(engine_id, |e| {
                became_healthy = e.health_status != HealthStatus::Healthy;
                e.health_status = HealthStatus::Healthy;
                e.last_probe_at = Some(now);
            })
            .await;

        if became_healthy {
            self.events
                .emit(OrchestratorEvent::EngineHealthy { engine_id: engine_id.to_owned(), at: now });
        }
    }

    pub async fn record_failure(&self, engine_id: &str) {
        let failures = {
            let counter = self.counters.entry(engine_id.to_owned()).or_default();
            counter.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
        };

        let now = Utc::now();
        let mut became_unhealthy = false;
        self.fleet
            .update_engine(engine_id, |e| {
                e.last_probe_at = Some(now);
                if failures >= FAILURE_THRESHOLD && e.health_status != HealthStatus::Unhealthy {
                    became_unhealthy = true;
                    e.health_status = HealthStatus::Unhealthy;
                }
            })
            .await;

        if became_unhealthy {
            let counter = self.counters.entry(engine_id.to_owned()).or_default();
            *counter.unhealthy_since.lock() = Some(Instant::now());
            drop(counter);
            warn!(engine_id, failures, "engine marked unhealthy");
            self.events
                .emit(OrchestratorEvent::EngineUnhealthy { engine_id: engine_id.to_owned(), at: now });
        }
    }

    /// Stops and removes every engine that has been continuously
    /// `Unhealthy` for longer than `unhealthy_grace` (§3 "unhealthy beyond
    /// grace" destroy trigger), skipping engines bound to a VPN currently
    /// in its recovery stabilization window (§4.3).
    async fn evict_unhealthy_beyond_grace(&self) {
        let candidates: Vec<_> = self
            .fleet
            .list_engines()
            .await
            .into_iter()
            .filter(|e| e.health_status == HealthStatus::Unhealthy)
            .collect();

        for engine in candidates {
            let grace_elapsed = self
                .counters
                .get(&engine.container_id)
                .and_then(|c| *c.unhealthy_since.lock())
                .is_some_and(|since| since.elapsed() >= self.unhealthy_grace);
            if !grace_elapsed {
                continue;
            }
            if let Some(vpn_name) = &engine.vpn_binding {
                if self.vpn.is_in_stabilization(vpn_name).await {
                    continue;
                }
            }

            if let Err(e) = self.driver.stop_container(&engine.container_id, 10).await {
                warn!(engine = %engine.container_id, error = %e, "failed to stop unhealthy engine beyond grace");
                continue;
            }
            self.fleet.remove_engine(&engine.container_id).await;
            self.forget(&engine.container_id);
            info!(engine = %engine.container_id, "evicted engine unhealthy beyond grace period");
        }
    }

    /// Called by the Stream Registry (C7) as it observes stats traffic;
    /// `last_data_at` only advances, never regresses behind a stale probe
    /// (§3 "Records `last_data_at` from the stats stream if more recent
    /// than a probe").
    pub async fn record_data(&self, engine_id: &str, at: DateTime<Utc>) {
        self.fleet
            .update_engine(engine_id, |e| {
                if e.last_data_at.is_none_or(|existing| at > existing) {
                    e.last_data_at = Some(at);
                }
            })
            .await;
    }

    pub fn forget(&self, engine_id: &str) {
        self.counters.remove(engine_id);
    }

    pub fn consecutive_failures(&self, engine_id: &str) -> u32 {
        self.counters.get(engine_id).map_or(0, |c| c.consecutive_failures.load(Ordering::SeqCst))
    }
}
