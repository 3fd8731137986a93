//! Background loop bootstrap, grounded on the teacher's `scheduler` module:
//! one `start` that spawns every manager's own loop against a shared
//! shutdown signal and hands back a handle the caller can stop with.

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::state::AppState;

/// Every background task spawned at startup, plus the shutdown sender that
/// tells them all to stop. Held by `main` for the lifetime of the process.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Signals every loop to stop. Does not await them — each loop's own
    /// `select!` exits promptly once it observes the signal, and the
    /// process is exiting regardless once `main` returns.
    pub fn stop(self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Starts the fleet snapshot writer, VPN pollers, health prober,
/// autoscaler tick, stream registry's four loops, and both proxy
/// heartbeat sweeps — one `watch` channel shared by all of them.
pub fn start(state: &AppState) -> Scheduler {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::new();

    handles.push(tokio::spawn(state.fleet().clone().run_snapshot_writer(shutdown_rx.clone())));
    handles.extend(state.vpn().start(shutdown_rx.clone()));
    handles.push(state.health().start(shutdown_rx.clone()));
    handles.push(state.autoscaler().start(shutdown_rx.clone()));
    handles.extend(state.stream_registry().start(shutdown_rx.clone()));
    handles.push(state.ts_proxy().start_heartbeat_sweep(shutdown_rx.clone()));
    handles.push(state.hls_proxy().start_heartbeat_sweep(shutdown_rx));

    tracing::info!(task_count = handles.len(), "background loops started");

    Scheduler { shutdown_tx, handles }
}
