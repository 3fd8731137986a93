//! Engine Selector (C6).
//!
//! `select(content_key)` scores every healthy engine and returns the best
//! one, short-circuiting through a 2 s per-key cache. Grounded on
//! `modules/proxy_pool.rs`'s strategy-pattern proxy-from-pool selection
//! (round-robin / least-used / random), generalized from a single strategy
//! enum to a weighted score over load, forwarded status, and health.


use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info};

use orchestrator_types::error::{OrchestratorError, Result};
use orchestrator_types::models::{ContentKey, Engine, OrchestratorEvent};

use crate::autoscaler::Autoscaler;
use crate::events::EventSubscriber;
use crate::fleet::FleetState;

struct CacheEntry {
    engine_id: String,
    cached_at: Instant,
}

/// Computes `select(content_key) -> engine` over Fleet State, caching
/// results briefly to blunt contention under request bursts (§4.6).
pub struct EngineSelector {
    fleet: Arc<FleetState>,
    autoscaler: Arc<Autoscaler>,
    cache: DashMap<ContentKey, CacheEntry>,
    cache_ttl: Duration,
    provision_wait: Duration,
}

impl EngineSelector {
    pub fn new(
        fleet: Arc<FleetState>,
        autoscaler: Arc<Autoscaler>,
        cache_ttl: Duration,
        provision_wait: Duration,
    ) -> Arc<Self> {
        Arc::new(Self { fleet, autoscaler, cache: DashMap::new(), cache_ttl, provision_wait })
    }

    /// Picks the best healthy engine for `content_key`, provisioning and
    /// waiting (up to `provision_wait`) if the fleet currently has no spare
    /// capacity at all.
    pub async fn select(&self, content_key: &str) -> Result<Engine> {
        if let Some(engine) = self.cached(content_key).await {
            return Ok(engine);
        }

        if let Some(engine) = self.best_candidate().await {
            self.cache.insert(content_key.to_owned(), CacheEntry { engine_id: engine.container_id.clone(), cached_at: Instant::now() });
            return Ok(engine);
        }

        if self.fleet.free_count().await != 0 {
            // Candidates exist but none scored (e.g. all unhealthy); nothing
            // provisioning can fix on this request's timeline.
            return Err(OrchestratorError::NoCapacity);
        }

        info!(content_key, "selector: no capacity, requesting provisioning");
        let total = self.fleet.capacity_total().await as u32;
        if let Err(e) = self.autoscaler.scale_to(total + 1).await {
            debug!(error = %e, "selector: provisioning request did not complete immediately");
        }

        let deadline = Instant::now() + self.provision_wait;
        loop {
            if let Some(engine) = self.best_candidate().await {
                self.cache.insert(content_key.to_owned(), CacheEntry { engine_id: engine.container_id.clone(), cached_at: Instant::now() });
                return Ok(engine);
            }
            if Instant::now() >= deadline {
                return Err(OrchestratorError::NoCapacity);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    async fn cached(&self, content_key: &str) -> Option<Engine> {
        let entry_id = {
            let entry = self.cache.get(content_key)?;
            if entry.cached_at.elapsed() >= self.cache_ttl {
                drop(entry);
                self.cache.remove(content_key);
                return None;
            }
            entry.engine_id.clone()
        };
        self.fleet.get_engine(&entry_id).await
    }

    async fn best_candidate(&self) -> Option<Engine> {
        let engines = self.fleet.list_engines().await;
        let mut best: Option<(i64, Engine)> = None;
        for engine in engines {
            if !engine.is_healthy() {
                continue;
            }
            let load = self.fleet.engine_load(&engine.container_id).await;
            let score = score(load, engine.forwarded);
            let better = match &best {
                None => true,
                Some((best_score, best_engine)) => {
                    score > *best_score || (score == *best_score && engine.created_at < best_engine.created_at)
                },
            };
            if better {
                best = Some((score, engine));
            }
        }
        best.map(|(_, engine)| engine)
    }

    /// Clears the whole selection cache on any `engine_*` event (§4.6).
    fn invalidate(&self) {
        self.cache.clear();
    }
}

/// `score = -10*load + 1000*forwarded - 1000*unhealthy`; the `unhealthy`
/// term is always 0 here since `best_candidate` only scores healthy
/// engines, kept for fidelity to the formula's full shape.
fn score(load: u32, forwarded: bool) -> i64 {
    -10 * i64::from(load) + 1000 * i64::from(forwarded)
}

impl EventSubscriber for EngineSelector {
    fn handle(&self, event: &OrchestratorEvent) {
        if matches!(
            event,
            OrchestratorEvent::EngineAdded { .. }
                | OrchestratorEvent::EngineRemoved { .. }
                | OrchestratorEvent::EngineHealthy { .. }
                | OrchestratorEvent::EngineUnhealthy { .. }
        ) {
            self.invalidate();
        }
    }
}
