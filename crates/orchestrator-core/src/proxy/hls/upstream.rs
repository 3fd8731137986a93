//! Engine contract consumed by the HLS fetcher (§4.8/§4.9).
//!
//! `open` is the same admission call C8 uses — reuses `proxy::ts::OpenedStream`
//! rather than redeclaring an identical struct. `fetch_manifest`/
//! `fetch_segment` are split the same way C8 splits control vs. data: a
//! short-lived JSON/text call and a long-lived byte fetch, both going through
//! the same `reqwest::Client` built with `proxy/common/client_builder.rs`'s
//! timeout pattern.

use async_trait::async_trait;
use bytes::Bytes;

use orchestrator_types::error::{OrchestratorError, Result};
use orchestrator_types::models::Engine;

use crate::proxy::common::ACCEPT_ENCODING_IDENTITY;
use crate::proxy::ts::OpenedStream;

#[async_trait]
pub trait HlsUpstream: Send + Sync {
    async fn open(&self, engine: &Engine, content_key: &str) -> Result<OpenedStream>;
    async fn fetch_manifest(&self, playback_url: &str) -> Result<String>;
    async fn fetch_segment(&self, url: &str) -> Result<Bytes>;
}

pub struct ReqwestHlsUpstream {
    client: reqwest::Client,
}

impl ReqwestHlsUpstream {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(OrchestratorError::TransientNetwork)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HlsUpstream for ReqwestHlsUpstream {
    async fn open(&self, engine: &Engine, content_key: &str) -> Result<OpenedStream> {
        #[derive(serde::Deserialize)]
        struct GetStreamResponse {
            response: GetStreamInner,
        }
        #[derive(serde::Deserialize)]
        struct GetStreamInner {
            playback_url: String,
            stat_url: String,
            command_url: String,
            playback_session_id: String,
        }

        let url = format!("http://{}:{}/ace/getstream?infohash={content_key}&format=json", engine.host, engine.port);
        let resp: GetStreamResponse = self.client.get(url).send().await?.json().await?;
        Ok(OpenedStream {
            playback_url: resp.response.playback_url,
            stat_url: resp.response.stat_url,
            command_url: resp.response.command_url,
            playback_session_id: resp.response.playback_session_id,
        })
    }

    async fn fetch_manifest(&self, playback_url: &str) -> Result<String> {
        let text = self
            .client
            .get(playback_url)
            .header(ACCEPT_ENCODING_IDENTITY.0, ACCEPT_ENCODING_IDENTITY.1)
            .send()
            .await?
            .text()
            .await?;
        Ok(text)
    }

    async fn fetch_segment(&self, url: &str) -> Result<Bytes> {
        let bytes = self
            .client
            .get(url)
            .header(ACCEPT_ENCODING_IDENTITY.0, ACCEPT_ENCODING_IDENTITY.1)
            .send()
            .await?
            .bytes()
            .await?;
        Ok(bytes)
    }
}

#[cfg(test)]
pub mod fake {
    use std::collections::{HashMap, VecDeque};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeHlsUpstream {
        opened: Mutex<HashMap<String, OpenedStream>>,
        manifests: Mutex<HashMap<String, VecDeque<String>>>,
        segments: Mutex<HashMap<String, Bytes>>,
    }

    impl FakeHlsUpstream {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_open_response(&self, content_key: &str, opened: OpenedStream) {
            self.opened.lock().insert(content_key.to_owned(), opened);
        }

        /// Queues a manifest body to be returned the next time
        /// `fetch_manifest` is called for `playback_url`; each call pops one
        /// entry, repeating the last queued one once the queue is drained.
        pub fn push_manifest(&self, playback_url: &str, body: impl Into<String>) {
            self.manifests.lock().entry(playback_url.to_owned()).or_default().push_back(body.into());
        }

        pub fn set_segment(&self, url: &str, data: Bytes) {
            self.segments.lock().insert(url.to_owned(), data);
        }
    }

    #[async_trait]
    impl HlsUpstream for FakeHlsUpstream {
        async fn open(&self, _engine: &Engine, content_key: &str) -> Result<OpenedStream> {
            self.opened.lock().get(content_key).cloned().ok_or_else(|| OrchestratorError::NotFound(content_key.to_owned()))
        }

        async fn fetch_manifest(&self, playback_url: &str) -> Result<String> {
            let mut manifests = self.manifests.lock();
            let queue = manifests.get_mut(playback_url).ok_or_else(|| OrchestratorError::NotFound(playback_url.to_owned()))?;
            if queue.len() > 1 {
                Ok(queue.pop_front().unwrap_or_default())
            } else {
                Ok(queue.front().cloned().unwrap_or_default())
            }
        }

        async fn fetch_segment(&self, url: &str) -> Result<Bytes> {
            self.segments.lock().get(url).cloned().ok_or_else(|| OrchestratorError::NotFound(url.to_owned()))
        }
    }
}
