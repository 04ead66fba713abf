//! IP geolocation with a pooled provider fallback chain
//!
//! The memory cache, provider states, and round-robin cursor live behind a
//! single mutex: one critical section covers "look up, pick provider,
//! count the call". Disk writes are serialised inside [`cache::DiskCache`].
//! The lock is never held across an await point.

pub mod cache;
pub mod provider;

pub use cache::{DiskCache, GeoCacheEntry};
pub use provider::{GeoProvider, ProviderStatus};

use crate::common::node::GeoInfo;
use crate::config::LocateConfig;
use crate::{Error, Result};
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

struct LocatorState {
    memory: HashMap<String, GeoCacheEntry>,
    providers: Vec<GeoProvider>,
    cursor: usize,
}

/// Pooled IP locator with write-through memory and disk caches
pub struct IpLocator {
    state: Mutex<LocatorState>,
    disk: DiskCache,
    client: reqwest::Client,
    ttl: ChronoDuration,
}

impl IpLocator {
    /// Build the locator; a configured custom provider is tried first
    pub fn new<P: AsRef<Path>>(config: &LocateConfig, cache_dir: P) -> Self {
        let mut providers = Vec::new();
        if let Some(url) = &config.custom_provider_url {
            providers.push(
                GeoProvider::new("custom", url, 0).with_key(config.custom_provider_key.clone()),
            );
        }
        providers.extend(provider::default_providers());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        IpLocator {
            state: Mutex::new(LocatorState {
                memory: HashMap::new(),
                providers,
                cursor: 0,
            }),
            disk: DiskCache::new(cache_dir),
            client,
            ttl: ChronoDuration::days(config.cache_ttl_days.max(1)),
        }
    }

    /// Resolve a host to a geolocation entry.
    ///
    /// Hostnames (anything that is not a literal IP) short-circuit to the
    /// `Others` sentinel without network I/O.
    pub async fn locate(&self, host: &str) -> Result<GeoCacheEntry> {
        if host.parse::<IpAddr>().is_err() {
            return Ok(GeoCacheEntry {
                ip: host.to_string(),
                geo: GeoInfo::others(),
                expires_at: Utc::now() + self.ttl,
            });
        }

        if let Some(hit) = self.cached(host) {
            return Ok(hit);
        }

        // First pass, plus one retry after a rate-limit advance
        match self.locate_via_pool(host).await {
            Ok(entry) => Ok(entry),
            Err(Error::Locate(msg)) if msg.contains("rate limited") => {
                debug!("retrying {} after provider rotation", host);
                self.locate_via_pool(host).await
            }
            Err(e) => Err(e),
        }
    }

    fn cached(&self, ip: &str) -> Option<GeoCacheEntry> {
        {
            let state = self.state.lock();
            if let Some(entry) = state.memory.get(ip) {
                if !entry.is_expired() {
                    return Some(entry.clone());
                }
            }
        }
        if let Some(entry) = self.disk.get(ip) {
            self.state
                .lock()
                .memory
                .insert(ip.to_string(), entry.clone());
            return Some(entry);
        }
        None
    }

    /// Pick a ready provider (one critical section: roll windows, advance
    /// the cursor, count the call) and issue the lookup.
    async fn locate_via_pool(&self, ip: &str) -> Result<GeoCacheEntry> {
        let (url, provider_index, provider_name) = {
            let mut state = self.state.lock();
            let now = Utc::now().timestamp();
            for provider in state.providers.iter_mut() {
                provider.roll_window(now);
            }

            let count = state.providers.len();
            let start = state.cursor;
            let mut selected = None;
            for offset in 0..count {
                let index = (start + offset) % count;
                if state.providers[index].status == ProviderStatus::Ready {
                    selected = Some(index);
                    break;
                }
            }
            let index = selected
                .ok_or_else(|| Error::locate("no ready geolocation provider in the pool"))?;
            state.cursor = index;
            state.providers[index].record_call();
            (
                state.providers[index].url_for(ip),
                index,
                state.providers[index].name.clone(),
            )
        };

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                self.mark_provider(provider_index, ProviderStatus::Failed);
                return Err(Error::locate(format!("{}: {}", provider_name, e)));
            }
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 429 || provider::is_rate_limit_signal(&body) {
            warn!("geolocation provider {} rate limited", provider_name);
            self.mark_provider(provider_index, ProviderStatus::Limited);
            self.advance_cursor();
            return Err(Error::locate(format!("{} rate limited", provider_name)));
        }
        if !status.is_success() {
            self.mark_provider(provider_index, ProviderStatus::Failed);
            return Err(Error::locate(format!(
                "{} returned HTTP {}",
                provider_name,
                status.as_u16()
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&body)
            .map_err(|e| Error::locate(format!("{} returned invalid JSON: {}", provider_name, e)))?;
        let parsed = provider::parse_response(&json);

        let geo = GeoInfo {
            country_code: parsed.country_code,
            country_name: parsed.country_name.unwrap_or_else(|| "Others".to_string()),
            city: parsed.city,
            org: parsed.org,
            asn: None,
            resolved_at: Utc::now(),
        };
        let entry = GeoCacheEntry {
            ip: ip.to_string(),
            geo,
            expires_at: Utc::now() + self.ttl,
        };

        // Write-through both caches
        self.state
            .lock()
            .memory
            .insert(ip.to_string(), entry.clone());
        if let Err(e) = self.disk.put(&entry) {
            warn!("geo disk cache write failed for {}: {}", ip, e);
        }

        Ok(entry)
    }

    fn mark_provider(&self, index: usize, status: ProviderStatus) {
        let mut state = self.state.lock();
        if let Some(provider) = state.providers.get_mut(index) {
            provider.status = status;
        }
    }

    fn advance_cursor(&self) {
        let mut state = self.state.lock();
        let count = state.providers.len();
        if count > 0 {
            state.cursor = (state.cursor + 1) % count;
        }
    }

    /// Drop expired entries from both caches
    pub fn purge_expired(&self) -> usize {
        {
            let mut state = self.state.lock();
            state.memory.retain(|_, entry| !entry.is_expired());
        }
        self.disk.purge_expired().unwrap_or(0)
    }

    /// Seed the memory cache (tests and warm starts)
    pub fn seed(&self, entry: GeoCacheEntry) {
        self.state.lock().memory.insert(entry.ip.clone(), entry);
    }
}
