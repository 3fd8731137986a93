//! Unified error taxonomy for the orchestrator.
//!
//! One variant per failure domain named in the error-handling design; each
//! maps to exactly one HTTP status and machine-readable `code` at the edge
//! (see `OrchestratorError::status_and_code`, used by
//! `orchestrator-server`'s `IntoResponse` impl).

use serde::Serialize;
use thiserror::Error;

/// Main error type for all orchestrator operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// Retried with backoff within the calling loop; surfaced only once the
    /// retry budget is exhausted.
    #[error("transient network error: {0}")]
    TransientNetwork(#[from] reqwest::Error),

    /// Container runtime failure, counted against the general circuit
    /// breaker.
    #[error("backend error: {0}")]
    BackendError(String),

    /// Admission or provisioning failed within `PROVISION_WAIT_S`.
    #[error("no capacity available")]
    NoCapacity,

    /// `content_key` is loop-blacklisted; never retried.
    #[error("stream blacklisted")]
    StreamBlacklisted,

    /// Both VPNs down in redundant mode, or the single configured VPN down.
    #[error("vpn unavailable")]
    VpnUnavailable,

    /// Engine closed the upstream mid-stream after the retry budget was
    /// exhausted.
    #[error("upstream gone")]
    UpstreamGone,

    /// Invalid runtime config rejected at the control endpoint; state is
    /// left unchanged.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No free host port in the configured range.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Scaling/provisioning blocked because the circuit breaker is open.
    #[error("blocked by circuit breaker for {0}")]
    BlockedProvisioning(String),

    /// Requested engine, stream, or VPN does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Filesystem I/O failure (snapshot read/write, blacklist persistence).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot or API payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unclassified error with message; used sparingly.
    #[error("unknown error: {0}")]
    Unknown(String),
}

impl Serialize for OrchestratorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

impl OrchestratorError {
    /// HTTP status code and machine-readable `code` this error maps to at
    /// the HTTP edge. Kept here (not in `orchestrator-server`) so the
    /// mapping is asserted by a single table-driven test alongside the
    /// variants it covers.
    pub const fn status_and_code(&self) -> (u16, &'static str) {
        match self {
            Self::TransientNetwork(_) => (502, "transient_network"),
            Self::BackendError(_) => (502, "backend_error"),
            Self::NoCapacity => (503, "no_capacity"),
            Self::StreamBlacklisted => (422, "stream_blacklisted"),
            Self::VpnUnavailable => (503, "vpn_unavailable"),
            Self::UpstreamGone => (502, "upstream_gone"),
            Self::Configuration(_) => (400, "configuration"),
            Self::ResourceExhausted(_) => (503, "resource_exhausted"),
            Self::BlockedProvisioning(_) => (503, "blocked_provisioning"),
            Self::NotFound(_) => (404, "not_found"),
            Self::Io(_) => (500, "io_error"),
            Self::Json(_) => (500, "serialization_error"),
            Self::Unknown(_) => (500, "unknown"),
        }
    }
}

/// Result type alias used throughout the orchestrator crates.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

impl From<String> for OrchestratorError {
    fn from(s: String) -> Self {
        Self::Unknown(s)
    }
}

impl From<&str> for OrchestratorError {
    fn from(s: &str) -> Self {
        Self::Unknown(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_one_status_and_code_each() {
        let cases: Vec<(OrchestratorError, u16, &str)> = vec![
            (OrchestratorError::NoCapacity, 503, "no_capacity"),
            (OrchestratorError::StreamBlacklisted, 422, "stream_blacklisted"),
            (OrchestratorError::VpnUnavailable, 503, "vpn_unavailable"),
            (OrchestratorError::UpstreamGone, 502, "upstream_gone"),
            (OrchestratorError::Configuration("bad".into()), 400, "configuration"),
            (OrchestratorError::BackendError("docker down".into()), 502, "backend_error"),
            (
                OrchestratorError::BlockedProvisioning("provision_general".into()),
                503,
                "blocked_provisioning",
            ),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status_and_code(), (status, code));
        }
    }

    #[test]
    fn serializes_as_display_string() {
        let err = OrchestratorError::NoCapacity;
        let json = serde_json::to_string(&err).expect("serialize");
        assert_eq!(json, "\"no capacity available\"");
    }
}
