//! Sharded on-disk IP location cache
//!
//! Shard files are keyed by the first dotted octet of the IPv4 address,
//! with a reserved `v6` bucket for everything else. Cardinality per shard
//! is low, so each write rewrites the whole shard file.

use crate::common::node::GeoInfo;
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One cached geolocation, with expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoCacheEntry {
    pub ip: String,
    pub geo: GeoInfo,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
}

impl GeoCacheEntry {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Shard file name for an address: first IPv4 octet, or `v6`
pub fn shard_key(ip: &str) -> String {
    match ip.split('.').next() {
        Some(octet) if octet.chars().all(|c| c.is_ascii_digit()) && !octet.is_empty() => {
            octet.to_string()
        }
        _ => "v6".to_string(),
    }
}

/// Disk cache with a single serialized writer
pub struct DiskCache {
    dir: PathBuf,
    writer: Mutex<()>,
}

impl DiskCache {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        DiskCache {
            dir: dir.as_ref().to_path_buf(),
            writer: Mutex::new(()),
        }
    }

    fn shard_path(&self, ip: &str) -> PathBuf {
        self.dir.join(format!("{}.json", shard_key(ip)))
    }

    fn load_shard(&self, path: &Path) -> HashMap<String, GeoCacheEntry> {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => map,
                Err(e) => {
                    warn!("geo shard {} is corrupt, resetting: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        }
    }

    /// Non-expired cache hit for an address
    pub fn get(&self, ip: &str) -> Option<GeoCacheEntry> {
        let shard = self.load_shard(&self.shard_path(ip));
        shard.get(ip).filter(|entry| !entry.is_expired()).cloned()
    }

    /// Write an entry through to its shard file
    pub fn put(&self, entry: &GeoCacheEntry) -> Result<()> {
        let _guard = self.writer.lock();
        std::fs::create_dir_all(&self.dir)?;
        let path = self.shard_path(&entry.ip);
        let mut shard = self.load_shard(&path);
        shard.insert(entry.ip.clone(), entry.clone());
        std::fs::write(&path, serde_json::to_string(&shard)?)?;
        Ok(())
    }

    /// Maintenance pass: drop expired entries from every shard
    pub fn purge_expired(&self) -> Result<usize> {
        let _guard = self.writer.lock();
        let mut purged = 0;
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(0),
        };
        for dir_entry in entries.flatten() {
            let path = dir_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let mut shard = self.load_shard(&path);
            let before = shard.len();
            shard.retain(|_, entry| !entry.is_expired());
            if shard.len() != before {
                purged += before - shard.len();
                std::fs::write(&path, serde_json::to_string(&shard)?)?;
            }
        }
        if purged > 0 {
            debug!("purged {} expired geo cache entries", purged);
        }
        Ok(purged)
    }
}
