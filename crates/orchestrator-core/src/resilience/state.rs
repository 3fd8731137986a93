//! Circuit breaker state types and configuration.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Circuit breaker configuration (§4.11: 3 failures in 120 s -> open for
/// 30 s -> half-open, allow 1 probe -> closed on success).
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub open_duration: Duration,
    pub success_threshold: u32,
}

impl CircuitBreakerConfig {
    pub const fn new(failure_threshold: u32, failure_window: Duration, open_duration: Duration) -> Self {
        Self { failure_threshold, failure_window, open_duration, success_threshold: 1 }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(120), Duration::from_secs(30))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-operation circuit breaker state. Unlike a plain consecutive-failure
/// counter, `recent_failures` holds timestamps so the breaker can apply
/// §4.11's windowed threshold ("3 failures in 120 s") rather than just "3
/// failures in a row with no time bound".
#[derive(Debug)]
pub(crate) struct OperationCircuit {
    pub state: CircuitState,
    pub recent_failures: VecDeque<Instant>,
    pub consecutive_successes: u32,
    pub opened_at: Option<Instant>,
    pub last_failure_reason: Option<String>,
    /// Set while a half-open probe is outstanding, so a second caller
    /// landing concurrently is refused rather than let through alongside
    /// it (§4.11 half-open "allow 1 probe"). Cleared by the matching
    /// `record_success`/`record_failure`.
    pub probe_in_flight: bool,
}

impl Default for OperationCircuit {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            recent_failures: VecDeque::new(),
            consecutive_successes: 0,
            opened_at: None,
            last_failure_reason: None,
            probe_in_flight: false,
        }
    }
}

impl OperationCircuit {
    /// Drops failure timestamps older than `window`, returning the count
    /// still inside it.
    pub fn prune_and_count(&mut self, window: Duration, now: Instant) -> u32 {
        while let Some(&front) = self.recent_failures.front() {
            if now.duration_since(front) > window {
                self.recent_failures.pop_front();
            } else {
                break;
            }
        }
        u32::try_from(self.recent_failures.len()).unwrap_or(u32::MAX)
    }
}

/// Snapshot of breaker counts across all tracked operations, exposed on
/// `/orchestrator/status`.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSummary {
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
    pub total_trips: u64,
}
