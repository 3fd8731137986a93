//! VPN sidecar HTTP contract (§6 "VPN sidecar contract consumed").
//!
//! The sidecar is a small per-VPN HTTP service (the repo's OpenVPN/PIA
//! forwarding sidecar); the coordinator only ever reads three endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use orchestrator_types::error::{OrchestratorError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicIpInfo {
    pub public_ip: Option<String>,
    pub country: Option<String>,
}

/// What the VPN Coordinator needs from a single VPN's sidecar. A trait so
/// tests can swap in a fixed-response double instead of a live sidecar,
/// the same split `ContainerDriver` (C1) uses for the container runtime.
#[async_trait]
pub trait VpnSidecarClient: Send + Sync {
    /// `GET /v1/openvpn/status` → `true` if `running`, `false` if `stopped`.
    async fn is_up(&self) -> Result<bool>;

    /// `GET /v1/openvpn/portforwarded` → the currently forwarded port, if any.
    async fn forwarded_port(&self) -> Result<Option<u16>>;

    /// `GET /v1/publicip/ip` → public IP and country, best-effort.
    async fn public_ip(&self) -> Result<PublicIpInfo>;
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct PortForwardedResponse {
    port: u16,
}

#[derive(Debug, Deserialize)]
struct PublicIpResponse {
    public_ip: Option<String>,
    country: Option<String>,
}

/// Production client: plain `reqwest` calls against the sidecar's base URL.
pub struct ReqwestVpnSidecarClient {
    base_url: String,
    client: reqwest::Client,
}

impl ReqwestVpnSidecarClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(OrchestratorError::TransientNetwork)?;
        Ok(Self { base_url: base_url.into(), client })
    }
}

#[async_trait]
impl VpnSidecarClient for ReqwestVpnSidecarClient {
    async fn is_up(&self) -> Result<bool> {
        let resp: StatusResponse = self
            .client
            .get(format!("{}/v1/openvpn/status", self.base_url))
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.status == "running")
    }

    async fn forwarded_port(&self) -> Result<Option<u16>> {
        let resp = self
            .client
            .get(format!("{}/v1/openvpn/portforwarded", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let parsed: PortForwardedResponse = resp.json().await?;
        Ok(Some(parsed.port))
    }

    async fn public_ip(&self) -> Result<PublicIpInfo> {
        let resp = self
            .client
            .get(format!("{}/v1/publicip/ip", self.base_url))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(PublicIpInfo::default());
        }
        let parsed: PublicIpResponse = resp.json().await?;
        Ok(PublicIpInfo { public_ip: parsed.public_ip, country: parsed.country })
    }
}

/// In-memory double used by the coordinator's own tests and by integration
/// tests elsewhere in the workspace that need a scripted VPN without a
/// live sidecar.
#[cfg(test)]
pub mod fake {
    use parking_lot::Mutex;

    use super::*;

    pub struct FakeVpnSidecarClient {
        state: Mutex<FakeState>,
    }

    struct FakeState {
        up: bool,
        port: Option<u16>,
        ip: PublicIpInfo,
    }

    impl FakeVpnSidecarClient {
        pub fn new(up: bool, port: Option<u16>) -> Self {
            Self { state: Mutex::new(FakeState { up, port, ip: PublicIpInfo::default() }) }
        }

        pub fn set_up(&self, up: bool) {
            self.state.lock().up = up;
        }

        pub fn set_port(&self, port: Option<u16>) {
            self.state.lock().port = port;
        }
    }

    #[async_trait]
    impl VpnSidecarClient for FakeVpnSidecarClient {
        async fn is_up(&self) -> Result<bool> {
            Ok(self.state.lock().up)
        }

        async fn forwarded_port(&self) -> Result<Option<u16>> {
            Ok(self.state.lock().port)
        }

        async fn public_ip(&self) -> Result<PublicIpInfo> {
            Ok(self.state.lock().ip.clone())
        }
    }
}
