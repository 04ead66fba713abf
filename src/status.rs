//! Persisted per-run sync status
//!
//! Survives across runs; the previous `finalNodeCount` feeds the
//! "change since last sync" figure in the completion notification.

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Per-stage wall-clock durations in milliseconds.
///
/// `emit` is 0 when artifact generation was skipped, never absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Durations {
    pub fetch: u64,
    pub probe: u64,
    pub emit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    #[serde(rename = "lastRunAt")]
    pub last_run_at: DateTime<Utc>,
    #[serde(rename = "inputNodeCount")]
    pub input_node_count: usize,
    #[serde(rename = "validNodeCount")]
    pub valid_node_count: usize,
    #[serde(rename = "finalNodeCount")]
    pub final_node_count: usize,
    pub durations: Durations,
}

impl SyncStatus {
    /// Load the previous run's status; `None` on first run or corruption
    pub fn load<P: AsRef<Path>>(path: P) -> Option<Self> {
        let content = std::fs::read_to_string(path.as_ref()).ok()?;
        match serde_json::from_str(&content) {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(
                    "sync status {} is corrupt, ignoring: {}",
                    path.as_ref().display(),
                    e
                );
                None
            }
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync_status.json");
        let status = SyncStatus {
            last_run_at: Utc::now(),
            input_node_count: 100,
            valid_node_count: 90,
            final_node_count: 42,
            durations: Durations {
                fetch: 1200,
                probe: 30000,
                emit: 150,
            },
        };
        status.save(&path).unwrap();

        let loaded = SyncStatus::load(&path).unwrap();
        assert_eq!(loaded.final_node_count, 42);
        assert_eq!(loaded.durations.probe, 30000);

        // Field spelling is part of the on-disk contract
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"lastRunAt\""));
        assert!(content.contains("\"finalNodeCount\""));
    }

    #[test]
    fn test_missing_and_corrupt_are_none() {
        let dir = tempdir().unwrap();
        assert!(SyncStatus::load(dir.path().join("nope.json")).is_none());
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(SyncStatus::load(&path).is_none());
    }
}
