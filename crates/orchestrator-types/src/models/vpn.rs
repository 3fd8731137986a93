//! VPN sidecar model (C3 VPN Coordinator's view).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnMode {
    Single,
    Redundant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VpnStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vpn {
    pub name: String,
    pub mode: VpnMode,
    pub status: VpnStatus,
    pub public_ip: Option<String>,
    pub country: Option<String>,
    pub forwarded_port: Option<u16>,
    pub last_recovery_at: Option<DateTime<Utc>>,
}

impl Vpn {
    pub const fn new(name: String, mode: VpnMode) -> Self {
        Self {
            name,
            mode,
            status: VpnStatus::Down,
            public_ip: None,
            country: None,
            forwarded_port: None,
            last_recovery_at: None,
        }
    }

    pub const fn is_up(&self) -> bool {
        matches!(self.status, VpnStatus::Up)
    }

    /// Whether `now` still falls within this VPN's recovery stabilization
    /// window (§4.3), during which cleanup/eviction of engines bound to it
    /// must be suppressed.
    pub fn in_stabilization_window(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        self.last_recovery_at.is_some_and(|t| now - t < window)
    }
}
