//! Host port allocation for newly provisioned engines.
//!
//! Scans the fleet's already-claimed host ports (HTTP/HTTPS/P2P bindings
//! alike, since they all draw from the same `PORT_RANGE_HOST`) and returns
//! the lowest free port in range, mirroring the plain linear-scan
//! allocators used for the teacher's own ephemeral port pools.

use std::collections::HashSet;

use orchestrator_types::error::{OrchestratorError, Result};
use orchestrator_types::models::Engine;

/// Every host port presently bound by a live engine.
pub fn claimed(engines: &[Engine]) -> HashSet<u16> {
    let mut used = HashSet::new();
    for engine in engines {
        used.insert(engine.port);
        if let Some(p) = engine.https_port {
            used.insert(p);
        }
        if let Some(p) = engine.p2p_port {
            used.insert(p);
        }
    }
    used
}

/// Lowest unclaimed port in `[low, high]`, skipping anything in `used`.
pub fn allocate(used: &HashSet<u16>, (low, high): (u16, u16)) -> Result<u16> {
    (low..=high)
        .find(|p| !used.contains(p))
        .ok_or_else(|| OrchestratorError::ResourceExhausted(format!("no free host port in {low}-{high}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free_port() {
        let mut used = HashSet::new();
        used.insert(30000);
        used.insert(30001);
        assert_eq!(allocate(&used, (30000, 31000)).unwrap(), 30002);
    }

    #[test]
    fn exhausted_range_errors() {
        let used: HashSet<u16> = (30000..=30002).collect();
        let err = allocate(&used, (30000, 30002)).unwrap_err();
        assert!(matches!(err, OrchestratorError::ResourceExhausted(_)));
    }
}
