//! Domain model: `Engine`, `Stream`, `Vpn`, the typed event set, and the
//! aggregate status derivation.
//!
//! `Session` and `Client` (the proxy's per-content upstream reader and its
//! attached clients) are intentionally *not* here — they are proxy-internal
//! per §3 "Ownership" and live in `orchestrator_core::proxy`, since no other
//! component reads them directly.

mod engine;
mod event;
mod stream;
mod vpn;

pub use engine::{Engine, EngineId, HealthStatus};
pub use event::{OrchestratorEvent, StreamEndReason};
pub use stream::{ContentKey, Stream, StreamId, StreamMetrics, StreamStatus};
pub use vpn::{Vpn, VpnMode, VpnStatus};

use serde::{Deserialize, Serialize};

/// Aggregate health as reported by `GET /orchestrator/status` (§7
/// "User-visible behavior"): healthy if the breaker is closed, the VPN is
/// ok, and free capacity meets the effective minimum; blocked if the
/// breaker is open or the VPN is unavailable; degraded otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrchestratorStatus {
    Healthy,
    Degraded,
    Blocked,
}

impl OrchestratorStatus {
    pub const fn derive(breaker_open: bool, vpn_ok: bool, free_count: u32, effective_min: u32) -> Self {
        if breaker_open || !vpn_ok {
            return Self::Blocked;
        }
        if free_count >= effective_min {
            Self::Healthy
        } else {
            Self::Degraded
        }
    }
}
