//! Engine (AceStream container) model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque container id, unique fleet-wide. Matches the container runtime's
/// own id rather than a separately minted one, so `inspect`/`list_managed`
/// round-trip it directly.
pub type EngineId = String;

/// Per-engine health as tracked by the Health Monitor (C4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

/// An AceStream container owned by the orchestrator.
///
/// Invariants (see spec §3): at most one engine per VPN has
/// `forwarded=true` (I3); `p2p_port` is set iff `forwarded=true` (I4).
/// Those invariants are enforced by the Autoscaler (C5), not by this
/// struct — the struct itself can represent a momentarily-invalid state
/// while a transition is in flight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Engine {
    pub container_id: EngineId,
    pub container_name: String,
    pub host: String,
    pub port: u16,
    pub https_port: Option<u16>,
    pub p2p_port: Option<u16>,
    pub forwarded: bool,
    pub health_status: HealthStatus,
    pub last_probe_at: Option<DateTime<Utc>>,
    pub last_data_at: Option<DateTime<Utc>>,
    pub vpn_binding: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub active_template_id: Option<String>,
}

impl Engine {
    pub fn new(container_id: EngineId, container_name: String, host: String, port: u16) -> Self {
        Self {
            container_id,
            container_name,
            host,
            port,
            https_port: None,
            p2p_port: None,
            forwarded: false,
            health_status: HealthStatus::Unknown,
            last_probe_at: None,
            last_data_at: None,
            vpn_binding: None,
            created_at: Utc::now(),
            labels: HashMap::new(),
            active_template_id: None,
        }
    }

    pub const fn is_healthy(&self) -> bool {
        matches!(self.health_status, HealthStatus::Healthy)
    }

    /// Age of this engine since creation, used for the scale-down
    /// minimum-lifetime check (§4.5 policy 4).
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}
