//! Prometheus metrics (`GET /metrics`), grounded on the teacher's
//! `proxy::prometheus` module: a global recorder installed once at
//! startup, gauges refreshed from live state on each scrape, counters fed
//! by an `EventSubscriber` that reacts to Fleet State's own mutation
//! events rather than every call site incrementing counters by hand.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use orchestrator_core::events::EventSubscriber;
use orchestrator_types::models::OrchestratorEvent;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the recorder and registers metric descriptions. Idempotent —
/// safe to call once at startup.
pub fn init() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus metrics recorder");

            describe_gauge!("orchestrator_engines_total", "Total engines in the fleet");
            describe_gauge!("orchestrator_capacity_used", "Engines carrying at least one started stream");
            describe_gauge!("orchestrator_streams_started", "Currently started streams");
            describe_counter!("orchestrator_streams_started_total", "Total streams started");
            describe_counter!("orchestrator_streams_ended_total", "Total streams ended, by reason");
            describe_counter!("orchestrator_engine_added_total", "Total engines provisioned");
            describe_counter!("orchestrator_engine_removed_total", "Total engines removed");
            describe_gauge!("orchestrator_breaker_trips_total", "Circuit breaker trips observed");
            describe_gauge!("orchestrator_uptime_seconds", "Server uptime in seconds");

            handle
        })
        .clone()
}

pub fn render() -> String {
    PROMETHEUS_HANDLE.get().map(PrometheusHandle::render).unwrap_or_default()
}

/// Updates gauges that reflect point-in-time fleet state; called on each
/// `/metrics` scrape rather than kept continuously in sync.
pub fn update_gauges(engines_total: usize, capacity_used: usize, streams_started: usize, breaker_trips: u64, uptime_secs: u64) {
    gauge!("orchestrator_engines_total").set(engines_total as f64);
    gauge!("orchestrator_capacity_used").set(capacity_used as f64);
    gauge!("orchestrator_streams_started").set(streams_started as f64);
    gauge!("orchestrator_breaker_trips_total").set(breaker_trips as f64);
    gauge!("orchestrator_uptime_seconds").set(uptime_secs as f64);
}

/// Fans lifecycle events into counters, mirroring the teacher's
/// `record_request`-style instrumentation but driven by C10 rather than
/// called ad hoc from every handler.
pub struct MetricsSubscriber;

impl MetricsSubscriber {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MetricsSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSubscriber for MetricsSubscriber {
    fn handle(&self, event: &OrchestratorEvent) {
        match event {
            OrchestratorEvent::EngineAdded { .. } => {
                counter!("orchestrator_engine_added_total").increment(1);
            },
            OrchestratorEvent::EngineRemoved { .. } => {
                counter!("orchestrator_engine_removed_total").increment(1);
            },
            OrchestratorEvent::StreamStarted { .. } => {
                counter!("orchestrator_streams_started_total").increment(1);
            },
            OrchestratorEvent::StreamEnded { reason, .. } => {
                counter!("orchestrator_streams_ended_total", "reason" => reason_label(*reason)).increment(1);
            },
            _ => {},
        }
    }
}

fn reason_label(reason: orchestrator_types::models::StreamEndReason) -> &'static str {
    use orchestrator_types::models::StreamEndReason;
    match reason {
        StreamEndReason::StatStopped => "stat_stopped",
        StreamEndReason::Idle => "idle",
        StreamEndReason::LoopDetected => "loop_detected",
        StreamEndReason::StaleTimeout => "stale_timeout",
        StreamEndReason::UpstreamError => "upstream_error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_types::models::StreamEndReason;

    #[test]
    fn reason_label_covers_every_variant() {
        assert_eq!(reason_label(StreamEndReason::StatStopped), "stat_stopped");
        assert_eq!(reason_label(StreamEndReason::Idle), "idle");
        assert_eq!(reason_label(StreamEndReason::LoopDetected), "loop_detected");
        assert_eq!(reason_label(StreamEndReason::StaleTimeout), "stale_timeout");
        assert_eq!(reason_label(StreamEndReason::UpstreamError), "upstream_error");
    }
}
