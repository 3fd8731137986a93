//! # Orchestrator Types
//!
//! Core data model, runtime configuration, and error definitions shared by
//! `orchestrator-core` and `orchestrator-server`.
//!
//! - **`error`** — the single crate-wide error taxonomy (`OrchestratorError`)
//! - **`config`** — environment-driven runtime configuration
//! - **`models`** — domain model: `Engine`, `Stream`, `Vpn`, events, status
//!
//! ## Architecture role
//!
//! ```text
//!              orchestrator-types (this crate)
//!                        |
//!                 orchestrator-core
//!                        |
//!                orchestrator-server
//! ```
//!
//! Types here are `Serialize`/`Deserialize` for the HTTP surface and the
//! persisted snapshot, and `Clone` for cheap sharing across async tasks.

pub mod config;
pub mod error;
pub mod models;

pub use config::OrchestratorConfig;
pub use error::{OrchestratorError, Result};
pub use models::{
    ContentKey, Engine, EngineId, HealthStatus, OrchestratorEvent, OrchestratorStatus, Stream,
    StreamEndReason, StreamId, StreamStatus, Vpn, VpnMode, VpnStatus,
};
