//! Circuit Breaker & Cooldown (C11).
//!
//! Classic 3-state breaker (closed/open/half-open) keyed by operation type
//! (`provision_general`, `provision_vpn:{name}`), generalizing the
//! teacher's account-keyed `CircuitBreakerManager`
//! (`proxy::common::circuit_breaker`) from a per-account key to an
//! arbitrary operation key.

mod state;


use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use state::OperationCircuit;
pub use state::{CircuitBreakerConfig, CircuitBreakerSummary, CircuitState};

/// Manages circuit breakers for all tracked operations.
#[derive(Debug)]
pub struct CircuitBreakerManager {
    config: CircuitBreakerConfig,
    circuits: RwLock<HashMap<String, OperationCircuit>>,
    total_trips: AtomicU64,
}

impl Default for CircuitBreakerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerManager {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self { config, circuits: RwLock::new(HashMap::new()), total_trips: AtomicU64::new(0) }
    }

    /// Returns `Ok(())` if the operation may proceed, `Err(remaining)` with
    /// the retry delay if the breaker is open.
    pub fn should_allow(&self, operation: &str) -> Result<(), Duration> {
        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(operation.to_owned()).or_default();

        match circuit.state {
            CircuitState::Open => {
                if let Some(opened_at) = circuit.opened_at {
                    let elapsed = opened_at.elapsed();
                    if elapsed >= self.config.open_duration {
                        debug!(operation, "circuit breaker transitioning to half-open");
                        circuit.state = CircuitState::HalfOpen;
                        circuit.consecutive_successes = 0;
                        circuit.probe_in_flight = true;
                        return Ok(());
                    }
                    return Err(self.config.open_duration.saturating_sub(elapsed));
                }
                Err(self.config.open_duration)
            },
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    return Err(self.config.open_duration);
                }
                circuit.probe_in_flight = true;
                Ok(())
            },
            CircuitState::Closed => Ok(()),
        }
    }

    pub fn record_success(&self, operation: &str) {
        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(operation.to_owned()).or_default();

        match circuit.state {
            CircuitState::Closed => {
                circuit.recent_failures.clear();
            },
            CircuitState::HalfOpen => {
                circuit.probe_in_flight = false;
                circuit.consecutive_successes += 1;
                if circuit.consecutive_successes >= self.config.success_threshold {
                    info!(operation, "circuit breaker closing - operation recovered");
                    circuit.state = CircuitState::Closed;
                    circuit.recent_failures.clear();
                    circuit.consecutive_successes = 0;
                    circuit.opened_at = None;
                    circuit.last_failure_reason = None;
                }
            },
            CircuitState::Open => {
                debug!(operation, "unexpected success while breaker open");
            },
        }
    }

    pub fn record_failure(&self, operation: &str, reason: &str) {
        let mut circuits = self.circuits.write();
        let circuit = circuits.entry(operation.to_owned()).or_default();
        let now = Instant::now();

        circuit.recent_failures.push_back(now);
        circuit.consecutive_successes = 0;
        circuit.last_failure_reason = Some(reason.to_owned());
        let failures_in_window = circuit.prune_and_count(self.config.failure_window, now);

        match circuit.state {
            CircuitState::Closed => {
                if failures_in_window >= self.config.failure_threshold {
                    warn!(operation, failures_in_window, reason, "circuit breaker opening");
                    circuit.state = CircuitState::Open;
                    circuit.opened_at = Some(now);
                    self.total_trips.fetch_add(1, Ordering::Relaxed);
                }
            },
            CircuitState::HalfOpen => {
                warn!(operation, reason, "circuit breaker re-opening - failure during half-open probe");
                circuit.state = CircuitState::Open;
                circuit.opened_at = Some(now);
                circuit.probe_in_flight = false;
                self.total_trips.fetch_add(1, Ordering::Relaxed);
            },
            CircuitState::Open => {},
        }
    }

    pub fn get_state(&self, operation: &str) -> CircuitState {
        let circuits = self.circuits.read();
        circuits.get(operation).map_or(CircuitState::Closed, |c| c.state)
    }

    pub fn is_open(&self, operation: &str) -> bool {
        matches!(self.get_state(operation), CircuitState::Open)
    }

    pub fn total_trips(&self) -> u64 {
        self.total_trips.load(Ordering::Relaxed)
    }

    pub fn reset(&self, operation: &str) {
        let mut circuits = self.circuits.write();
        if let Some(circuit) = circuits.get_mut(operation) {
            info!(operation, previous_state = ?circuit.state, "circuit breaker reset manually");
            *circuit = OperationCircuit::default();
        }
    }

    pub fn get_summary(&self) -> CircuitBreakerSummary {
        let circuits = self.circuits.read();
        let mut closed = 0;
        let mut open = 0;
        let mut half_open = 0;

        for circuit in circuits.values() {
            match circuit.state {
                CircuitState::Closed => closed += 1,
                CircuitState::Open => open += 1,
                CircuitState::HalfOpen => half_open += 1,
            }
        }

        CircuitBreakerSummary { closed, open, half_open, total_trips: self.total_trips() }
    }
}

/// Operation key for fleet-wide (non-VPN-specific) provisioning.
pub const PROVISION_GENERAL: &str = "provision_general";

/// Operation key for provisioning bound to a specific VPN.
pub fn provision_vpn_key(vpn_name: &str) -> String {
    format!("provision_vpn:{vpn_name}")
}
