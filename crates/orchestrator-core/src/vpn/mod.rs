//! VPN Coordinator (C3).
//!
//! One cooperative poll loop per configured VPN (§4.3), grounded on the
//! teacher's `scheduler.rs` loop-starter shape: a `tokio::spawn`ed task that
//! ticks on an interval, reloads nothing-but-its-own-state each cycle, and
//! shuts down cooperatively. Shutdown handling is lifted from
//! `proxy/health/monitor.rs`'s `tokio::select!`-against-`watch` idiom.

pub(crate) mod client;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub use client::{PublicIpInfo, ReqwestVpnSidecarClient, VpnSidecarClient};

use orchestrator_types::error::Result;
use orchestrator_types::models::{OrchestratorEvent, Vpn, VpnMode, VpnStatus};

use crate::container::ContainerDriver;
use crate::events::EventBus;
use crate::fleet::FleetState;

/// Coordinates one or more VPNs against their sidecars, gating the
/// Autoscaler (C5) and Health Monitor (C4) via stabilization windows and
/// emergency-mode caps (§4.3).
pub struct VpnCoordinator {
    driver: Arc<dyn ContainerDriver>,
    fleet: Arc<FleetState>,
    events: Arc<EventBus>,
    clients: HashMap<String, Arc<dyn VpnSidecarClient>>,
    vpns: RwLock<HashMap<String, Vpn>>,
    poll_interval: std::time::Duration,
    recovery_stabilization: chrono::Duration,
    max_active_replicas: u32,
}

impl VpnCoordinator {
    pub fn new(
        driver: Arc<dyn ContainerDriver>,
        fleet: Arc<FleetState>,
        events: Arc<EventBus>,
        vpns: Vec<(Vpn, Arc<dyn VpnSidecarClient>)>,
        poll_interval: std::time::Duration,
        recovery_stabilization: chrono::Duration,
        max_active_replicas: u32,
    ) -> Self {
        let mut vpn_map = HashMap::new();
        let mut clients = HashMap::new();
        for (vpn, client) in vpns {
            clients.insert(vpn.name.clone(), client);
            vpn_map.insert(vpn.name.clone(), vpn);
        }
        Self {
            driver,
            fleet,
            events,
            clients,
            vpns: RwLock::new(vpn_map),
            poll_interval,
            recovery_stabilization,
            max_active_replicas,
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.clients.is_empty()
    }

    pub async fn get(&self, name: &str) -> Option<Vpn> {
        self.vpns.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<Vpn> {
        self.vpns.read().await.values().cloned().collect()
    }

    /// `vpn_ok` input to `OrchestratorStatus::derive` (§7): no VPN configured
    /// is trivially ok; single mode requires that one VPN up; redundant mode
    /// requires at least one of the two up.
    pub async fn vpn_ok(&self) -> bool {
        let vpns = self.vpns.read().await;
        if vpns.is_empty() {
            return true;
        }
        vpns.values().any(Vpn::is_up)
    }

    pub async fn is_in_stabilization(&self, vpn_name: &str) -> bool {
        let now = Utc::now();
        self.vpns
            .read()
            .await
            .get(vpn_name)
            .is_some_and(|v| v.in_stabilization_window(now, self.recovery_stabilization))
    }

    /// Emergency mode: exactly one VPN down while running in redundant mode
    /// with the other up. Returns the name of the healthy VPN that future
    /// provisioning must move to, and the cap the Autoscaler must enforce.
    pub async fn emergency_state(&self) -> Option<(String, u32)> {
        let vpns = self.vpns.read().await;
        if vpns.len() != 2 {
            return None;
        }
        let mut down = vpns.values().filter(|v| v.mode == VpnMode::Redundant && !v.is_up());
        let failed = down.next()?;
        if down.next().is_some() {
            return None;
        }
        let healthy = vpns.values().find(|v| v.name != failed.name && v.is_up())?;
        Some((healthy.name.clone(), self.max_active_replicas))
    }

    /// True iff `name` is the down side of a genuine emergency: redundant
    /// mode, exactly 2 VPNs configured, `name` down and the other one up.
    /// `emergency_state` names the *healthy* VPN to provision against, so it
    /// can't be reused by name comparison here — a single-mode outage or a
    /// both-down redundant pair must not match (§4.3 emergency mode).
    async fn is_failed_side_of_emergency(&self, name: &str) -> bool {
        let vpns = self.vpns.read().await;
        if vpns.len() != 2 {
            return false;
        }
        let Some(this) = vpns.get(name) else { return false };
        if this.mode != VpnMode::Redundant || this.is_up() {
            return false;
        }
        vpns.values().any(|v| v.name != name && v.is_up())
    }

    /// Runs one poll loop per configured VPN until `shutdown` fires.
    pub fn start(self: &Arc<Self>, shutdown: tokio::sync::watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        self.clients
            .keys()
            .cloned()
            .map(|name| {
                let coordinator = Arc::clone(self);
                let mut shutdown_rx = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            () = tokio::time::sleep(coordinator.poll_interval) => {
                                if let Err(e) = coordinator.poll_once(&name).await {
                                    warn!(vpn = %name, error = %e, "vpn poll failed");
                                }
                            }
                            _ = shutdown_rx.changed() => {
                                if *shutdown_rx.borrow() {
                                    info!(vpn = %name, "vpn coordinator loop shutting down");
                                    return;
                                }
                            }
                        }
                    }
                })
            })
            .collect()
    }

    async fn poll_once(&self, name: &str) -> Result<()> {
        let Some(client) = self.clients.get(name) else { return Ok(()) };
        let is_up = client.is_up().await?;
        let forwarded_port = if is_up { client.forwarded_port().await? } else { None };
        let ip = if is_up { client.public_ip().await? } else { PublicIpInfo::default() };

        let mut vpns = self.vpns.write().await;
        let Some(vpn) = vpns.get_mut(name) else { return Ok(()) };

        let was_up = vpn.is_up();
        let previous_port = vpn.forwarded_port;
        let now = Utc::now();

        vpn.status = if is_up { VpnStatus::Up } else { VpnStatus::Down };
        vpn.public_ip = ip.public_ip;
        vpn.country = ip.country;

        let status_changed = was_up != is_up;
        if status_changed {
            if is_up {
                vpn.last_recovery_at = Some(now);
                info!(vpn = %name, "vpn recovered");
            } else {
                warn!(vpn = %name, "vpn went down");
            }
        }

        let port_changed = is_up && forwarded_port != previous_port && forwarded_port.is_some();
        if port_changed {
            vpn.forwarded_port = forwarded_port;
            vpn.last_recovery_at = Some(now);
        }
        let vpn_snapshot = vpn.clone();
        drop(vpns);

        if status_changed {
            self.events.emit(OrchestratorEvent::VpnChanged {
                name: name.to_owned(),
                status: vpn_snapshot.status,
                at: now,
            });
        }
        if let (true, Some(port)) = (port_changed, forwarded_port) {
            self.invalidate_forwarded_engine(name).await;
            self.events.emit(OrchestratorEvent::VpnPortChanged {
                name: name.to_owned(),
                forwarded_port: port,
                at: now,
            });
        }
        if status_changed && !is_up && self.is_failed_side_of_emergency(name).await {
            self.evict_engines_bound_to(name).await;
        }

        Ok(())
    }

    /// Stops the engine currently designated `forwarded` for this VPN so the
    /// Autoscaler provisions a replacement bound to the new port (§4.3,
    /// worked scenario 4).
    async fn invalidate_forwarded_engine(&self, vpn_name: &str) {
        let forwarded = self
            .fleet
            .list_engines()
            .await
            .into_iter()
            .find(|e| e.forwarded && e.vpn_binding.as_deref() == Some(vpn_name));
        let Some(engine) = forwarded else { return };
        if let Err(e) = self.driver.stop_container(&engine.container_id, 10).await {
            warn!(engine = %engine.container_id, error = %e, "failed to stop invalidated forwarded engine");
        }
        self.fleet.remove_engine(&engine.container_id).await;
    }

    /// Emergency-mode eviction: every engine bound to a VPN that just went
    /// down is stopped immediately (§4.3 emergency mode, step b).
    async fn evict_engines_bound_to(&self, vpn_name: &str) {
        let bound: Vec<_> = self
            .fleet
            .list_engines()
            .await
            .into_iter()
            .filter(|e| e.vpn_binding.as_deref() == Some(vpn_name))
            .collect();
        for engine in bound {
            if let Err(e) = self.driver.stop_container(&engine.container_id, 10).await {
                warn!(engine = %engine.container_id, error = %e, "failed to evict engine bound to failed vpn");
            }
            self.fleet.remove_engine(&engine.container_id).await;
        }
    }
}
