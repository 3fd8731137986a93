//! Runtime configuration.
//!
//! The orchestrator's primary operator surface is environment variables
//! (§6 CLI/environment). `OrchestratorConfig` is an enumerated, validated
//! struct loaded with `clap`'s `env` feature rather than a duck-typed dict,
//! per the Design Notes redesign flag. A subset of fields is mutable at
//! runtime through the control surface (`apply_patch`); every update is
//! validated before being swapped in, leaving state unchanged on rejection.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, Result};

/// Streaming delivery mode for the multiplex proxy (§3 Config).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProxyStreamMode {
    Ts,
    Hls,
}

impl Default for ProxyStreamMode {
    fn default() -> Self {
        Self::Ts
    }
}

/// Full runtime configuration, sourced from environment variables.
///
/// Field groups follow §3's Config enumeration order: fleet sizing,
/// proxy/streaming timing, VPN/breaker windows, and the HTTP/persistence
/// surface.
#[derive(Debug, Clone, clap::Parser, Serialize, Deserialize)]
#[command(name = "orchestrator", about = "Acestream fleet orchestrator")]
pub struct OrchestratorConfig {
    /// Minimum number of *free* (zero-load) engines to keep provisioned.
    #[arg(long, env = "MIN_REPLICAS", default_value_t = 2)]
    pub min_replicas: u32,

    /// Hard ceiling on total fleet size.
    #[arg(long, env = "MAX_REPLICAS", default_value_t = 6)]
    pub max_replicas: u32,

    /// Per-VPN cap on active (bound) replicas (Open Question: treated as
    /// per-VPN, see DESIGN.md).
    #[arg(long, env = "MAX_ACTIVE_REPLICAS", default_value_t = 4)]
    pub max_active_replicas: u32,

    /// Streams per engine before lookahead provisioning kicks in.
    #[arg(long, env = "MAX_STREAMS_PER_ENGINE", default_value_t = 3)]
    pub max_streams_per_engine: u32,

    /// Stats collector poll interval.
    #[arg(long, env = "COLLECT_INTERVAL_S", default_value_t = 2)]
    pub collect_interval_s: u64,

    /// Loop detector tick interval.
    #[arg(long, env = "STREAM_LOOP_CHECK_INTERVAL_S", default_value_t = 10)]
    pub stream_loop_check_interval_s: u64,

    /// Seconds without broadcast progress before a stream is considered
    /// looping.
    #[arg(long, env = "STREAM_LOOP_THRESHOLD_S", default_value_t = 3600)]
    pub stream_loop_threshold_s: u64,

    /// Stale-stream detector: seconds with no data movement before
    /// termination.
    #[arg(long, env = "STREAM_TIMEOUT_S", default_value_t = 120)]
    pub stream_timeout_s: u64,

    /// Ended-stream retention before cleanup.
    #[arg(long, env = "ENDED_RETENTION_S", default_value_t = 3600)]
    pub ended_retention_s: u64,

    /// Cleanup loop interval.
    #[arg(long, env = "CLEANUP_INTERVAL_S", default_value_t = 300)]
    pub cleanup_interval_s: u64,

    /// Delivery mode: TS (ring buffer) or HLS (segment buffer).
    #[arg(long, env = "PROXY_STREAM_MODE", value_enum, default_value_t = ProxyStreamMode::Ts)]
    pub proxy_stream_mode: ProxyStreamMode,

    /// Client heartbeat interval.
    #[arg(long, env = "HEARTBEAT_INTERVAL_S", default_value_t = 10)]
    pub heartbeat_interval_s: u64,

    /// Multiplier on `heartbeat_interval_s` past which a client is a ghost.
    #[arg(long, env = "GHOST_MULTIPLIER", default_value_t = 5)]
    pub ghost_multiplier: u64,

    /// Grace period after last client disconnect before a Session stops.
    #[arg(long, env = "CHANNEL_SHUTDOWN_DELAY_S", default_value_t = 5)]
    pub channel_shutdown_delay_s: u64,

    /// Chunks a client may lag before its read position jumps to the head.
    #[arg(long, env = "CATCH_UP_THRESHOLD", default_value_t = 50)]
    pub catch_up_threshold: u64,

    /// Maximum chunks retained in the ring buffer before oldest-eviction.
    #[arg(long, env = "MAX_CHUNKS", default_value_t = 120)]
    pub max_chunks: u64,

    /// Per-chunk TTL in the ring buffer.
    #[arg(long, env = "CHUNK_TTL_S", default_value_t = 60)]
    pub chunk_ttl_s: u64,

    /// Target chunk size in bytes (aligned down to the 188-byte TS packet
    /// boundary by the writer).
    #[arg(long, env = "CHUNK_TARGET_BYTES", default_value_t = 1_048_576)]
    pub chunk_target_bytes: usize,

    /// HLS segment fetch interval, expressed as a multiplier of segment
    /// duration.
    #[arg(long, env = "HLS_SEGMENT_FETCH_INTERVAL", default_value_t = 0.5)]
    pub hls_segment_fetch_interval: f64,

    /// Segments retained per channel in the HLS segment buffer.
    #[arg(long, env = "HLS_MAX_SEGMENTS", default_value_t = 20)]
    pub hls_max_segments: u32,

    /// Segments advertised in the generated manifest.
    #[arg(long, env = "HLS_WINDOW_SIZE", default_value_t = 6)]
    pub hls_window_size: u32,

    /// VPN sidecar poll interval.
    #[arg(long, env = "VPN_POLL_INTERVAL_S", default_value_t = 5)]
    pub vpn_poll_interval_s: u64,

    /// Window after a recovery event during which cleanup/eviction is
    /// suppressed for engines bound to the recovering VPN.
    #[arg(long, env = "RECOVERY_STABILIZATION_S", default_value_t = 120)]
    pub recovery_stabilization_s: u64,

    /// Health probe interval.
    #[arg(long, env = "HEALTH_PROBE_INTERVAL_S", default_value_t = 10)]
    pub health_probe_interval_s: u64,

    /// Consecutive failed probes before an engine is marked unhealthy.
    #[arg(long, env = "HEALTH_FAILURE_THRESHOLD", default_value_t = 3)]
    pub health_failure_threshold: u32,

    /// Seconds an engine must stay continuously `Unhealthy` before the
    /// Health Monitor evicts it (§3 "unhealthy beyond grace" destroy
    /// trigger; no env var is named by spec, see DESIGN.md).
    #[arg(long, env = "UNHEALTHY_GRACE_S", default_value_t = 60)]
    pub unhealthy_grace_s: u64,

    /// Selection cache TTL per content key.
    #[arg(long, env = "SELECTOR_CACHE_TTL_S", default_value_t = 2)]
    pub selector_cache_ttl_s: u64,

    /// Budget for a client request to wait for a freshly provisioned
    /// engine before `no_capacity`.
    #[arg(long, env = "PROVISION_WAIT_S", default_value_t = 15)]
    pub provision_wait_s: u64,

    /// Circuit breaker failure threshold within `breaker_window_s`.
    #[arg(long, env = "BREAKER_FAILURE_THRESHOLD", default_value_t = 3)]
    pub breaker_failure_threshold: u32,

    /// Circuit breaker failure-counting window.
    #[arg(long, env = "BREAKER_WINDOW_S", default_value_t = 120)]
    pub breaker_window_s: u64,

    /// Circuit breaker open-state duration before half-open probing.
    #[arg(long, env = "BREAKER_OPEN_S", default_value_t = 30)]
    pub breaker_open_s: u64,

    /// Minimum engine lifetime before it is scale-down eligible.
    #[arg(long, env = "SCALE_DOWN_MIN_LIFETIME_S", default_value_t = 60)]
    pub scale_down_min_lifetime_s: u64,

    /// Global cooldown after any scaling action.
    #[arg(long, env = "SCALING_COOLDOWN_S", default_value_t = 60)]
    pub scaling_cooldown_s: u64,

    /// Host port range for container port allocation, `low-high` inclusive.
    #[arg(long, env = "PORT_RANGE_HOST", default_value = "30000-31000")]
    pub port_range_host: String,

    /// Fallback container-side HTTP port range when CONF omits it.
    #[arg(long, env = "ACE_HTTP_RANGE", default_value = "6878-6978")]
    pub ace_http_range: String,

    /// Fallback container-side HTTPS port range when CONF omits it.
    #[arg(long, env = "ACE_HTTPS_RANGE", default_value = "6879-6979")]
    pub ace_https_range: String,

    /// Upstream HTTP connect timeout.
    #[arg(long, env = "UPSTREAM_CONNECT_TIMEOUT_S", default_value_t = 10)]
    pub upstream_connect_timeout_s: u64,

    /// Upstream HTTP read timeout.
    #[arg(long, env = "UPSTREAM_READ_TIMEOUT_S", default_value_t = 30)]
    pub upstream_read_timeout_s: u64,

    /// Snapshot debounce interval.
    #[arg(long, env = "SNAPSHOT_DEBOUNCE_S", default_value_t = 5)]
    pub snapshot_debounce_s: u64,

    /// Path to the Fleet State snapshot file.
    #[arg(long, env = "SNAPSHOT_PATH", default_value = "./data/fleet-snapshot.json")]
    pub snapshot_path: String,

    /// Optional loop-blacklist persistence file. Unset means in-memory
    /// only (lost on restart).
    #[arg(long, env = "BLACKLIST_PATH")]
    pub blacklist_path: Option<String>,

    /// Minutes after which a blacklist entry expires; 0 means indefinite.
    #[arg(long, env = "BLACKLIST_RETENTION_MINUTES", default_value_t = 0)]
    pub blacklist_retention_minutes: u64,

    /// HTTP bind address.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    /// Bearer token required by privileged endpoints (provisioning,
    /// engine deletion, external event ingress, blacklist management).
    #[arg(long, env = "API_TOKEN", default_value = "")]
    pub api_token: String,

    /// Log level / `RUST_LOG`-style filter directive.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Docker image the Autoscaler provisions new engines from.
    #[arg(long, env = "ENGINE_IMAGE", default_value = "magnetikonline/acestream-engine:latest")]
    pub engine_image: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        use clap::Parser;
        Self::parse_from(std::iter::empty::<String>())
    }
}

impl OrchestratorConfig {
    /// Host port range as an inclusive `(low, high)` pair.
    pub fn port_range_host(&self) -> Result<(u16, u16)> {
        parse_port_range(&self.port_range_host)
    }

    /// Fallback container HTTP port range.
    pub fn ace_http_range(&self) -> Result<(u16, u16)> {
        parse_port_range(&self.ace_http_range)
    }

    /// Fallback container HTTPS port range.
    pub fn ace_https_range(&self) -> Result<(u16, u16)> {
        parse_port_range(&self.ace_https_range)
    }

    /// Applies a control-plane patch, validating the whole resulting
    /// configuration before mutating `self`. On rejection, `self` is left
    /// unchanged (§7 `configuration` error semantics).
    pub fn apply_patch(&mut self, patch: ConfigPatch) -> Result<()> {
        let mut candidate = self.clone();
        if let Some(v) = patch.min_replicas {
            candidate.min_replicas = v;
        }
        if let Some(v) = patch.max_replicas {
            candidate.max_replicas = v;
        }
        if let Some(v) = patch.max_active_replicas {
            candidate.max_active_replicas = v;
        }
        if let Some(v) = patch.max_streams_per_engine {
            candidate.max_streams_per_engine = v;
        }
        if let Some(v) = patch.stream_loop_threshold_s {
            candidate.stream_loop_threshold_s = v;
        }
        if let Some(v) = patch.proxy_stream_mode {
            candidate.proxy_stream_mode = v;
        }
        candidate.validate()?;
        *self = candidate;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.min_replicas > self.max_replicas {
            return Err(OrchestratorError::Configuration(format!(
                "min_replicas ({}) exceeds max_replicas ({})",
                self.min_replicas, self.max_replicas
            )));
        }
        if self.max_active_replicas == 0 {
            return Err(OrchestratorError::Configuration(
                "max_active_replicas must be positive".to_owned(),
            ));
        }
        if self.max_streams_per_engine == 0 {
            return Err(OrchestratorError::Configuration(
                "max_streams_per_engine must be positive".to_owned(),
            ));
        }
        self.port_range_host()?;
        Ok(())
    }
}

/// Partial update to the mutable subset of `OrchestratorConfig`, as
/// accepted by the control-plane `/config`-equivalent endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    pub min_replicas: Option<u32>,
    pub max_replicas: Option<u32>,
    pub max_active_replicas: Option<u32>,
    pub max_streams_per_engine: Option<u32>,
    pub stream_loop_threshold_s: Option<u64>,
    pub proxy_stream_mode: Option<ProxyStreamMode>,
}

fn parse_port_range(raw: &str) -> Result<(u16, u16)> {
    let (low, high) = raw
        .split_once('-')
        .ok_or_else(|| OrchestratorError::Configuration(format!("invalid port range: {raw}")))?;
    let low: u16 = low
        .trim()
        .parse()
        .map_err(|_| OrchestratorError::Configuration(format!("invalid port range: {raw}")))?;
    let high: u16 = high
        .trim()
        .parse()
        .map_err(|_| OrchestratorError::Configuration(format!("invalid port range: {raw}")))?;
    if low > high {
        return Err(OrchestratorError::Configuration(format!("invalid port range: {raw}")));
    }
    Ok((low, high))
}
