//! Egress proxy cache
//!
//! A flat JSON file of `http(s)://` and `socks5://` proxy URLs residing in
//! the regional-egress jurisdiction. Loaded once at orchestrator start and
//! rewritten after each run from the final classification pass, so the next
//! run has warm proxies for geo-restricted sources.

use crate::Result;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Round-robin pool over the cached egress proxy URLs
pub struct EgressProxyPool {
    path: PathBuf,
    proxies: Vec<String>,
    cursor: Mutex<usize>,
}

impl EgressProxyPool {
    /// Load the pool from the cache file; a missing file yields an empty pool
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let proxies = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Vec<String>>(&content) {
                Ok(list) => list,
                Err(e) => {
                    warn!("egress cache {} is corrupt, ignoring: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        debug!("loaded {} egress proxies from {}", proxies.len(), path.display());
        EgressProxyPool {
            path,
            proxies,
            cursor: Mutex::new(0),
        }
    }

    /// Empty pool, not backed by a file (tests)
    pub fn empty() -> Self {
        EgressProxyPool {
            path: PathBuf::new(),
            proxies: Vec::new(),
            cursor: Mutex::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Next proxy URL, round-robin
    pub fn next(&self) -> Option<String> {
        if self.proxies.is_empty() {
            return None;
        }
        let mut cursor = self.cursor.lock();
        let proxy = self.proxies[*cursor % self.proxies.len()].clone();
        *cursor = cursor.wrapping_add(1);
        Some(proxy)
    }

    /// Rewrite the cache file with a fresh harvest
    pub fn store<P: AsRef<Path>>(path: P, proxies: &[String]) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(proxies)?;
        std::fs::write(path, content)?;
        debug!("stored {} egress proxies to {}", proxies.len(), path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
