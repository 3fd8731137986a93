//! Production `ContainerDriver` backed by the Docker Engine API via
//! `bollard`. No example repo in the retrieval pack touches a container
//! runtime, so this module has no direct teacher analogue; its shape
//! (narrow trait impl wrapping a single client handle) follows the same
//! pattern as `BollardDriver`'s sibling, `FakeDriver`, and the
//! `AccountRepository` trait it both implement.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, StopContainerOptions,
};
use bollard::models::{HostConfig, PortBinding as DockerPortBinding};
use bollard::Docker;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use orchestrator_types::error::{OrchestratorError, Result};

use super::{ContainerDriver, ContainerInfo, ContainerSpec, PortBinding, PortSpec};

pub struct BollardDriver {
    docker: Docker,
}

impl BollardDriver {
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| OrchestratorError::BackendError(format!("docker connect: {e}")))?;
        Ok(Self { docker })
    }

    fn port_bindings(spec: &PortSpec) -> HashMap<String, Option<Vec<DockerPortBinding>>> {
        let mut bindings = HashMap::new();
        bindings.insert(
            format!("{}/tcp", spec.http.container_port),
            Some(vec![DockerPortBinding {
                host_ip: None,
                host_port: Some(spec.http.host_port.to_string()),
            }]),
        );
        if let Some(https) = spec.https {
            bindings.insert(
                format!("{}/tcp", https.container_port),
                Some(vec![DockerPortBinding {
                    host_ip: None,
                    host_port: Some(https.host_port.to_string()),
                }]),
            );
        }
        if let Some(p2p) = spec.p2p {
            bindings.insert(
                format!("{}/tcp", p2p.container_port),
                Some(vec![DockerPortBinding {
                    host_ip: None,
                    host_port: Some(p2p.host_port.to_string()),
                }]),
            );
            bindings.insert(
                format!("{}/udp", p2p.container_port),
                Some(vec![DockerPortBinding {
                    host_ip: None,
                    host_port: Some(p2p.host_port.to_string()),
                }]),
            );
        }
        bindings
    }
}

#[async_trait]
impl ContainerDriver for BollardDriver {
    async fn create_container(&self, spec: ContainerSpec) -> Result<ContainerInfo> {
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let host_config = HostConfig {
            port_bindings: Some(Self::port_bindings(&spec.ports)),
            ..Default::default()
        };
        let config = Config {
            image: Some(spec.image.clone()),
            env: Some(env),
            labels: Some(spec.labels.clone()),
            host_config: Some(host_config),
            exposed_ports: Some(
                [
                    Some(spec.ports.http.container_port),
                    spec.ports.https.map(|p| p.container_port),
                    spec.ports.p2p.map(|p| p.container_port),
                ]
                .into_iter()
                .flatten()
                .map(|p| (format!("{p}/tcp"), HashMap::new()))
                .collect(),
            ),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            .map_err(|e| OrchestratorError::BackendError(format!("create_container: {e}")))?;

        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| OrchestratorError::BackendError(format!("start_container: {e}")))?;

        info!(container_id = %created.id, "container created and started");

        self.inspect(&created.id)
            .await?
            .ok_or_else(|| OrchestratorError::BackendError("container vanished after start".into()))
    }

    async fn stop_container(&self, id: &str, grace_s: u64) -> Result<()> {
        let options = StopContainerOptions { t: i64::try_from(grace_s).unwrap_or(i64::MAX) };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(())
            },
            Err(e) => {
                warn!(container_id = id, error = %e, "stop_container failed");
                Err(OrchestratorError::BackendError(format!("stop_container: {e}")))
            },
        }
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerInfo>> {
        match self.docker.inspect_container(id, None).await {
            Ok(details) => Ok(Some(container_info_from_inspect(details))),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                Ok(None)
            },
            Err(e) => Err(OrchestratorError::BackendError(format!("inspect: {e}"))),
        }
    }

    async fn list_by_label(&self, label_key: &str, label_value: &str) -> Result<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_owned(), vec![format!("{label_key}={label_value}")]);
        let options = ListContainersOptions { all: true, filters, ..Default::default() };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| OrchestratorError::BackendError(format!("list_containers: {e}")))?;

        Ok(containers.into_iter().filter_map(container_info_from_summary).collect())
    }
}

fn container_info_from_inspect(details: bollard::models::ContainerInspectResponse) -> ContainerInfo {
    let labels = details.config.as_ref().and_then(|c| c.labels.clone()).unwrap_or_default();
    let running = details.state.as_ref().and_then(|s| s.running).unwrap_or(false);
    let created_at = details
        .created
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    ContainerInfo {
        id: details.id.unwrap_or_default(),
        name: details.name.unwrap_or_default(),
        labels,
        // Port mappings are reconstructed by Fleet State's reindex from the
        // container's labels (§4.2), not re-derived from Docker's own port
        // summary here, since `acestream.template_id` determines which
        // ports actually matter for a given engine.
        ports: PortSpec {
            http: PortBinding { host_port: 0, container_port: 0 },
            https: None,
            p2p: None,
        },
        running,
        created_at,
    }
}

fn container_info_from_summary(summary: bollard::models::ContainerSummary) -> Option<ContainerInfo> {
    Some(ContainerInfo {
        id: summary.id?,
        name: summary.names.and_then(|mut n| n.pop()).unwrap_or_default(),
        labels: summary.labels.unwrap_or_default(),
        ports: PortSpec {
            http: PortBinding { host_port: 0, container_port: 0 },
            https: None,
            p2p: None,
        },
        running: summary.state.as_deref() == Some("running"),
        created_at: summary
            .created
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now),
    })
}
