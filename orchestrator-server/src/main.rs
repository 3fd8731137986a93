//! Orchestrator Server — headless daemon.
//!
//! Wires the fleet/VPN/proxy managers from `orchestrator-core` behind
//! `AppState`, starts every background loop, and serves the HTTP surface
//! (§6). Shape follows the teacher's `main.rs`: logging init, state build,
//! router build, `axum::serve` bootstrap.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use orchestrator_types::config::OrchestratorConfig;

mod auth;
mod metrics;
mod router;
mod scheduler;
mod state;

mod api;

use state::AppState;

/// Exit codes per §6 "CLI / environment".
const EXIT_FATAL_CONFIG: u8 = 1;
const EXIT_BACKEND_UNREACHABLE: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let config = OrchestratorConfig::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = option_env!("GIT_VERSION").unwrap_or("dev"), "orchestrator-server starting");

    metrics::init();

    if let Err(e) = config.port_range_host() {
        error!(error = %e, "invalid configuration, refusing to start");
        return ExitCode::from(EXIT_FATAL_CONFIG);
    }

    let state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "failed to reach the container backend at startup");
            return ExitCode::from(EXIT_BACKEND_UNREACHABLE);
        },
    };

    let bind_addr = state.config().bind_addr.clone();
    let shutdown_handles = scheduler::start(&state);

    let app = router::build_router(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, addr = %bind_addr, "failed to bind HTTP listener");
            return ExitCode::from(EXIT_FATAL_CONFIG);
        },
    };
    info!(addr = %bind_addr, "HTTP listener bound");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    shutdown_handles.stop();

    if let Err(e) = result {
        error!(error = %e, "server exited with error");
        return ExitCode::from(EXIT_FATAL_CONFIG);
    }

    info!("orchestrator-server shut down cleanly");
    ExitCode::SUCCESS
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
