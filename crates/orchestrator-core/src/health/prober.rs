//! Engine health probe (§6 "Engine (upstream) contract consumed").
//!
//! The engine's web UI exposes a lightweight status call used purely as a
//! liveness check; the orchestrator does not parse its body, only its
//! reachability and HTTP status.

use std::time::Duration;

use async_trait::async_trait;

use orchestrator_types::error::Result;
use orchestrator_types::models::Engine;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait EngineProber: Send + Sync {
    async fn probe(&self, engine: &Engine) -> Result<bool>;
}

pub struct ReqwestEngineProber {
    client: reqwest::Client,
}

impl ReqwestEngineProber {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(orchestrator_types::error::OrchestratorError::TransientNetwork)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EngineProber for ReqwestEngineProber {
    async fn probe(&self, engine: &Engine) -> Result<bool> {
        let url = format!("http://{}:{}/webui/api/service?method=get_version", engine.host, engine.port);
        match self.client.get(url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
pub mod fake {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    pub struct FakeProber {
        healthy: AtomicBool,
    }

    impl FakeProber {
        pub fn new(healthy: bool) -> Self {
            Self { healthy: AtomicBool::new(healthy) }
        }

        pub fn set_healthy(&self, healthy: bool) {
            self.healthy.store(healthy, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EngineProber for FakeProber {
        async fn probe(&self, _engine: &Engine) -> Result<bool> {
            Ok(self.healthy.load(Ordering::SeqCst))
        }
    }
}
