//! In-memory `ContainerDriver` test double, mirroring the teacher's
//! in-memory `AccountRepository` used throughout its test suite.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use orchestrator_types::error::Result;

use super::{ContainerDriver, ContainerInfo, ContainerSpec, PortSpec};

/// Records every container the driver has ever "started", without talking
/// to a real runtime. `stop_container` removes by id and is idempotent.
pub struct FakeDriver {
    containers: DashMap<String, ContainerInfo>,
    next_id: AtomicU64,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self { containers: DashMap::new(), next_id: AtomicU64::new(1) }
    }

    pub fn seed(&self, info: ContainerInfo) {
        self.containers.insert(info.id.clone(), info);
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerDriver for FakeDriver {
    async fn create_container(&self, spec: ContainerSpec) -> Result<ContainerInfo> {
        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let info = ContainerInfo {
            id: id.clone(),
            name: format!("acestream-{id}"),
            labels: spec.labels,
            ports: spec.ports,
            running: true,
            created_at: Utc::now(),
        };
        self.containers.insert(id, info.clone());
        Ok(info)
    }

    async fn stop_container(&self, id: &str, _grace_s: u64) -> Result<()> {
        self.containers.remove(id);
        Ok(())
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerInfo>> {
        Ok(self.containers.get(id).map(|entry| entry.value().clone()))
    }

    async fn list_by_label(&self, label_key: &str, label_value: &str) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .containers
            .iter()
            .filter(|entry| entry.value().labels.get(label_key).map(String::as_str) == Some(label_value))
            .map(|entry| entry.value().clone())
            .collect())
    }
}
