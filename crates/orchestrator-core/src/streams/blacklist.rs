//! LoopBlacklist — content keys whose streams looped, gating admission
//! (§4.8 step 1, P5). Not persisted by default; `save`/`load` are used only
//! when `blacklist_path` is configured (§6 "Persisted state").

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use orchestrator_types::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub content_key: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct LoopBlacklist {
    entries: DashMap<String, DateTime<Utc>>,
}

impl LoopBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, content_key: impl Into<String>) {
        self.entries.insert(content_key.into(), Utc::now());
    }

    pub fn contains(&self, content_key: &str) -> bool {
        self.entries.contains_key(content_key)
    }

    pub fn remove(&self, content_key: &str) -> bool {
        self.entries.remove(content_key).is_some()
    }

    pub fn list(&self) -> Vec<BlacklistEntry> {
        self.entries
            .iter()
            .map(|e| BlacklistEntry { content_key: e.key().clone(), detected_at: *e.value() })
            .collect()
    }

    /// Drops entries older than `retention` when `RETENTION_MINUTES>0`
    /// (§3 LoopBlacklist "Retention: indefinite unless RETENTION_MINUTES>0").
    pub fn evict_expired(&self, retention: chrono::Duration) -> usize {
        let cutoff = Utc::now() - retention;
        let before = self.entries.len();
        self.entries.retain(|_, detected_at| *detected_at >= cutoff);
        before - self.entries.len()
    }

    pub async fn save(&self, path: &str) -> Result<()> {
        let entries = self.list();
        let body = serde_json::to_vec_pretty(&entries)?;
        let tmp_path = format!("{path}.tmp");
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    pub fn load(path: &str) -> Self {
        let blacklist = Self::default();
        if let Ok(contents) = std::fs::read_to_string(path) {
            if let Ok(entries) = serde_json::from_str::<Vec<BlacklistEntry>>(&contents) {
                for entry in entries {
                    blacklist.entries.insert(entry.content_key, entry.detected_at);
                }
            }
        }
        blacklist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_contains() {
        let bl = LoopBlacklist::new();
        assert!(!bl.contains("abc"));
        bl.insert("abc");
        assert!(bl.contains("abc"));
    }

    #[test]
    fn evict_expired_drops_only_old_entries() {
        let bl = LoopBlacklist::new();
        bl.insert("fresh");
        bl.entries.insert("stale".into(), Utc::now() - chrono::Duration::hours(2));

        let removed = bl.evict_expired(chrono::Duration::hours(1));
        assert_eq!(removed, 1);
        assert!(bl.contains("fresh"));
        assert!(!bl.contains("stale"));
    }
}
