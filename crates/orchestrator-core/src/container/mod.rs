//! Container Driver (C1).
//!
//! A narrow interface to create/stop/inspect containers and read their
//! labels, generalizing the teacher's `AccountRepository` trait/test-double
//! split (`modules/repository.rs` + its `test_helpers` fake) to container
//! lifecycle operations instead of account storage.

mod bollard_driver;
mod fake;

pub use bollard_driver::BollardDriver;
pub use fake::FakeDriver;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use orchestrator_types::error::Result;

/// Label the orchestrator stamps on every container it creates, used by
/// `list_by_label`/`list_managed` to distinguish its fleet from unrelated
/// containers on the same host.
pub const OWNER_LABEL: &str = "orchestrator.owner";

/// Host/container port pair plus protocol, as returned by `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub host_port: u16,
    pub container_port: u16,
}

/// Container-side ports an engine should bind, and the host ports they are
/// mapped from. Container ports come from the user-supplied CONF when
/// present (§4.1): the engine's bind port is configured via CONF, not
/// inferred, so the Docker port mapping must match it exactly.
#[derive(Debug, Clone)]
pub struct PortSpec {
    pub http: PortBinding,
    pub https: Option<PortBinding>,
    pub p2p: Option<PortBinding>,
}

/// What `create_container` needs to start an engine.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub image: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub ports: PortSpec,
}

/// What the driver reports back about a managed container.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
    pub ports: PortSpec,
    pub running: bool,
    pub created_at: DateTime<Utc>,
}

/// Narrow interface to the container runtime. `BollardDriver` is the
/// production implementation (Docker Engine API via `bollard`); `FakeDriver`
/// is an in-memory test double used by every component test that would
/// otherwise need a live Docker daemon.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Creates and starts a container. Fails with `resource_exhausted` when
    /// no host port is free in the configured range, `backend_error` on any
    /// other driver failure.
    async fn create_container(&self, spec: ContainerSpec) -> Result<ContainerInfo>;

    /// Idempotent: succeeds if the container is already gone.
    async fn stop_container(&self, id: &str, grace_s: u64) -> Result<()>;

    /// `Ok(None)` if the container does not exist (or was already removed).
    async fn inspect(&self, id: &str) -> Result<Option<ContainerInfo>>;

    /// Returns only containers bearing `label_key=label_value`, i.e. the
    /// orchestrator's own managed set when called with `OWNER_LABEL`.
    async fn list_by_label(&self, label_key: &str, label_value: &str) -> Result<Vec<ContainerInfo>>;

    /// Convenience wrapper used by C2's startup reindex.
    async fn list_managed(&self, owner_id: &str) -> Result<Vec<ContainerInfo>> {
        self.list_by_label(OWNER_LABEL, owner_id).await
    }
}
