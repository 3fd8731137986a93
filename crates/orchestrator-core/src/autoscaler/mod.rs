//! Autoscaler (C5).
//!
//! Five ordered policies evaluated against Fleet State, VPN Coordinator,
//! and the circuit breaker (§4.5). The tick cadence follows the same
//! `tokio::select!`-against-`watch` loop-starter shape every other
//! background loop in this crate uses (`vpn::VpnCoordinator::start`,
//! `health::HealthMonitor::start`), but the policy ordering itself has no
//! teacher analogue — the teacher proxies LLM APIs, it doesn't scale
//! compute.

mod ports;


use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{info, warn};

use orchestrator_types::config::OrchestratorConfig;
use orchestrator_types::error::{OrchestratorError, Result};
use orchestrator_types::models::{Engine, Vpn};

use crate::container::{ContainerDriver, ContainerSpec, OWNER_LABEL, PortBinding, PortSpec};
use crate::fleet::FleetState;
use crate::resilience::{provision_vpn_key, CircuitBreakerManager, PROVISION_GENERAL};
use crate::vpn::VpnCoordinator;

/// Internal cadence of the autoscaler's policy tick. Not operator-tunable:
/// §3's Config enumeration has no dedicated env var for it, unlike every
/// other loop interval in this crate.
const TICK_INTERVAL: Duration = Duration::from_secs(5);

/// What a single `tick()` (or an explicit `scale_to`) actually did, for the
/// scheduler to log and for tests to assert against.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct TickReport {
    pub provisioned: Vec<String>,
    pub stopped: Vec<String>,
}

impl TickReport {
    fn acted(&self) -> bool {
        !self.provisioned.is_empty() || !self.stopped.is_empty()
    }
}

/// Enforces MIN/MAX/MAX_ACTIVE replica policy, lookahead scaling, and
/// forwarded-engine placement, gated by C11's breaker and C3's
/// stabilization windows (§4.5).
pub struct Autoscaler {
    owner_id: String,
    driver: Arc<dyn ContainerDriver>,
    fleet: Arc<FleetState>,
    vpn: Arc<VpnCoordinator>,
    breaker: Arc<CircuitBreakerManager>,
    config: RwLock<OrchestratorConfig>,
    lookahead_layer: Mutex<Option<u32>>,
    cooldown_until: Mutex<Option<Instant>>,
}

impl Autoscaler {
    pub fn new(
        owner_id: String,
        driver: Arc<dyn ContainerDriver>,
        fleet: Arc<FleetState>,
        vpn: Arc<VpnCoordinator>,
        breaker: Arc<CircuitBreakerManager>,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            owner_id,
            driver,
            fleet,
            vpn,
            breaker,
            config: RwLock::new(config),
            lookahead_layer: Mutex::new(None),
            cooldown_until: Mutex::new(None),
        })
    }

    pub fn update_config(&self, config: OrchestratorConfig) {
        *self.config.write() = config;
    }

    fn snapshot_config(&self) -> OrchestratorConfig {
        self.config.read().clone()
    }

    /// Runs the policy tick loop until `shutdown` fires.
    pub fn start(self: &Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        let autoscaler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tokio::time::sleep(TICK_INTERVAL) => {
                        let report = autoscaler.tick().await;
                        if report.acted() {
                            info!(
                                provisioned = report.provisioned.len(),
                                stopped = report.stopped.len(),
                                "autoscaler tick acted"
                            );
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            info!("autoscaler shutting down");
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Runs policies 1 (ensure minimum free), 2 (lookahead), and 4
    /// (scale-down) in order. Policy 3 (`scale_to`) is operator-triggered,
    /// not part of the periodic tick.
    pub async fn tick(self: &Arc<Self>) -> TickReport {
        let cfg = self.snapshot_config();
        let mut report = TickReport::default();

        let emergency = self.vpn.emergency_state().await;
        let (forced_vpn, active_cap) = match &emergency {
            Some((name, cap)) => (Some(name.clone()), *cap),
            None => (None, cfg.max_active_replicas),
        };

        self.ensure_minimum_free(&cfg, forced_vpn.as_deref(), active_cap, &mut report).await;

        if self.in_cooldown() {
            info!("autoscaler: cooldown active, skipping lookahead and scale-down this tick");
            return report;
        }

        self.lookahead(&cfg, forced_vpn.as_deref(), active_cap, &mut report).await;
        self.scale_down_n(&cfg, 1, &mut report).await;

        report
    }

    /// Policy 3. Clamps `n` to `[MIN_REPLICAS, MAX_REPLICAS]`, then further
    /// to `MAX_ACTIVE_REPLICAS` while a VPN is configured.
    pub async fn scale_to(self: &Arc<Self>, n: u32) -> Result<TickReport> {
        let cfg = self.snapshot_config();
        if self.in_cooldown() {
            return Err(OrchestratorError::BlockedProvisioning("scaling cooldown active".to_owned()));
        }

        let mut desired = n.clamp(cfg.min_replicas, cfg.max_replicas);
        if self.vpn.is_configured() {
            desired = desired.min(cfg.max_active_replicas);
        }

        let mut report = TickReport::default();
        let total = self.fleet.capacity_total().await as u32;

        if desired > total {
            for _ in 0..(desired - total) {
                match self.provision_one(&cfg, None).await {
                    Ok(engine) => report.provisioned.push(engine.container_id),
                    Err(e) => {
                        warn!(error = %e, "scale_to provisioning failed");
                        break;
                    },
                }
            }
        } else if desired < total {
            self.scale_down_n(&cfg, total - desired, &mut report).await;
        }

        if report.acted() {
            self.start_cooldown(&cfg);
        }
        Ok(report)
    }

    // ---- Policy 1: ensure minimum free --------------------------------

    async fn ensure_minimum_free(
        &self,
        cfg: &OrchestratorConfig,
        forced_vpn: Option<&str>,
        active_cap: u32,
        report: &mut TickReport,
    ) {
        let effective_min = self.effective_min(cfg);
        let free = self.fleet.free_count().await;
        if free >= effective_min {
            return;
        }
        let deficit = effective_min - free;

        let to_provision = if self.vpn.is_configured() {
            let total = self.fleet.capacity_total().await as u32;
            if total >= active_cap {
                info!(total, active_cap, "autoscaler: at active-replicas cap, skipping ensure-minimum-free");
                return;
            }
            deficit.min(active_cap - total)
        } else {
            deficit
        };

        for _ in 0..to_provision {
            match self.provision_one(cfg, forced_vpn).await {
                Ok(engine) => report.provisioned.push(engine.container_id),
                Err(e) => {
                    warn!(error = %e, "ensure-minimum-free provisioning failed");
                    break;
                },
            }
        }
        if report.acted() {
            self.start_cooldown(cfg);
        }
    }

    fn effective_min(&self, cfg: &OrchestratorConfig) -> u32 {
        if self.vpn.is_configured() {
            cfg.min_replicas.min(cfg.max_active_replicas)
        } else {
            cfg.min_replicas
        }
    }

    // ---- Policy 2: lookahead -------------------------------------------

    async fn lookahead(
        &self,
        cfg: &OrchestratorConfig,
        forced_vpn: Option<&str>,
        active_cap: u32,
        report: &mut TickReport,
    ) {
        let engines = self.fleet.list_engines().await;
        if engines.is_empty() {
            return;
        }

        let mut loads = Vec::with_capacity(engines.len());
        for engine in &engines {
            loads.push(self.fleet.engine_load(&engine.container_id).await);
        }
        let min_load = *loads.iter().min().expect("non-empty");

        {
            let mut layer = self.lookahead_layer.lock();
            if let Some(armed_at) = *layer {
                if min_load >= armed_at {
                    *layer = None;
                } else {
                    return;
                }
            }
        }

        let threshold = cfg.max_streams_per_engine.saturating_sub(1);
        if !loads.iter().any(|&load| load >= threshold) {
            return;
        }

        if self.vpn.is_configured() && engines.len() as u32 >= active_cap {
            return;
        }

        match self.provision_one(cfg, forced_vpn).await {
            Ok(engine) => {
                *self.lookahead_layer.lock() = Some(min_load);
                report.provisioned.push(engine.container_id);
                self.start_cooldown(cfg);
            },
            Err(e) => warn!(error = %e, "lookahead provisioning failed"),
        }
    }

    // ---- Policy 4: scale-down ------------------------------------------

    async fn scale_down_n(&self, cfg: &OrchestratorConfig, max_to_stop: u32, report: &mut TickReport) {
        let effective_min = self.effective_min(cfg);
        let min_lifetime = chrono::Duration::seconds(i64::try_from(cfg.scale_down_min_lifetime_s).unwrap_or(i64::MAX));

        for _ in 0..max_to_stop {
            if self.fleet.free_count().await <= effective_min {
                break;
            }
            let Some(engine) = self.pick_scale_down_candidate(min_lifetime).await else { break };

            if let Err(e) = self.driver.stop_container(&engine.container_id, 10).await {
                warn!(engine = %engine.container_id, error = %e, "scale-down stop_container failed");
                break;
            }
            self.fleet.remove_engine(&engine.container_id).await;
            report.stopped.push(engine.container_id);
            self.start_cooldown(cfg);
        }
    }

    async fn pick_scale_down_candidate(&self, min_lifetime: chrono::Duration) -> Option<Engine> {
        let engines = self.fleet.list_engines().await;
        let mut candidates = Vec::new();
        for engine in engines {
            if engine.forwarded {
                continue;
            }
            if self.fleet.engine_load(&engine.container_id).await != 0 {
                continue;
            }
            if engine.age() < min_lifetime {
                continue;
            }
            if let Some(vpn_name) = &engine.vpn_binding {
                if self.vpn.is_in_stabilization(vpn_name).await {
                    continue;
                }
            }
            candidates.push(engine);
        }
        candidates.into_iter().min_by_key(|e| e.created_at)
    }

    // ---- Provisioning ----------------------------------------------------

    async fn provision_one(&self, cfg: &OrchestratorConfig, forced_vpn: Option<&str>) -> Result<Engine> {
        let vpn_name = match forced_vpn {
            Some(name) => Some(name.to_owned()),
            None => self.pick_vpn_binding().await,
        };
        let op_key = match &vpn_name {
            Some(name) => provision_vpn_key(name),
            None => PROVISION_GENERAL.to_owned(),
        };

        self.breaker
            .should_allow(&op_key)
            .map_err(|remaining| OrchestratorError::BlockedProvisioning(format!("{op_key}, retry in {remaining:?}")))?;

        let result = self.try_provision(cfg, vpn_name.as_deref()).await;
        match &result {
            Ok(_) => self.breaker.record_success(&op_key),
            Err(e) => self.breaker.record_failure(&op_key, &e.to_string()),
        }
        result
    }

    async fn pick_vpn_binding(&self) -> Option<String> {
        self.vpn.list().await.into_iter().find(Vpn::is_up).map(|v| v.name)
    }

    /// Policy 5 (forwarded placement) is folded in here: the next
    /// provisioned engine is marked `forwarded` whenever its VPN has no
    /// forwarded engine yet and is up.
    async fn try_provision(&self, cfg: &OrchestratorConfig, vpn_name: Option<&str>) -> Result<Engine> {
        let engines = self.fleet.list_engines().await;
        let mut used = ports::claimed(&engines);
        let host_range = cfg.port_range_host()?;
        let http_host_port = ports::allocate(&used, host_range)?;
        used.insert(http_host_port);
        let https_host_port = ports::allocate(&used, host_range)?;
        used.insert(https_host_port);

        let (container_http_port, _) = cfg.ace_http_range()?;
        let (container_https_port, _) = cfg.ace_https_range()?;

        let vpn_snapshot = match vpn_name {
            Some(name) => self.vpn.get(name).await,
            None => None,
        };
        let forwarded = match (vpn_name, &vpn_snapshot) {
            (Some(name), Some(vpn)) if vpn.is_up() => !self.fleet.has_forwarded_engine(name).await,
            _ => false,
        };
        let p2p_host_port = if forwarded { vpn_snapshot.as_ref().and_then(|v| v.forwarded_port) } else { None };

        let mut labels = HashMap::new();
        labels.insert(OWNER_LABEL.to_owned(), self.owner_id.clone());
        labels.insert("acestream.forwarded".to_owned(), forwarded.to_string());
        if let Some(name) = vpn_name {
            labels.insert("acestream.vpn".to_owned(), name.to_owned());
        }

        let spec = ContainerSpec {
            image: cfg.engine_image.clone(),
            env: HashMap::new(),
            labels,
            ports: PortSpec {
                http: PortBinding { host_port: http_host_port, container_port: container_http_port },
                https: Some(PortBinding { host_port: https_host_port, container_port: container_https_port }),
                p2p: p2p_host_port.map(|port| PortBinding { host_port: port, container_port: port }),
            },
        };

        let info = self.driver.create_container(spec).await?;

        let mut engine = Engine::new(info.id.clone(), info.name.clone(), "127.0.0.1".to_owned(), http_host_port);
        engine.https_port = Some(https_host_port);
        engine.labels = info.labels.clone();
        engine.vpn_binding = vpn_name.map(str::to_owned);
        engine.forwarded = forwarded;
        if forwarded {
            engine.p2p_port = p2p_host_port;
        }

        self.fleet.insert_engine(engine.clone()).await;
        info!(engine_id = %engine.container_id, vpn = ?vpn_name, forwarded, "engine provisioned");
        Ok(engine)
    }

    // ---- Cooldown --------------------------------------------------------

    fn start_cooldown(&self, cfg: &OrchestratorConfig) {
        *self.cooldown_until.lock() = Some(Instant::now() + Duration::from_secs(cfg.scaling_cooldown_s));
    }

    fn in_cooldown(&self) -> bool {
        self.cooldown_until.lock().is_some_and(|until| Instant::now() < until)
    }
}
