//! Debounced JSON snapshot of Fleet State (§6 "Persisted state").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orchestrator_types::error::Result;
use orchestrator_types::models::{Engine, Stream};

/// On-disk schema: `{ engines, streams (status=started only), lookahead_layer?, updated_at }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub engines: Vec<Engine>,
    pub streams: Vec<Stream>,
    pub lookahead_layer: Option<u32>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

pub fn load(path: &str) -> Option<FleetSnapshot> {
    let contents = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

pub async fn save(path: &str, snapshot: &FleetSnapshot) -> Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let body = serde_json::to_vec_pretty(snapshot)?;
    let tmp_path = format!("{path}.tmp");
    tokio::fs::write(&tmp_path, &body).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}
