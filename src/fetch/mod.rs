//! Resilient subscription fetcher
//!
//! Loops over a cartesian product of retries and user agents, appending a
//! fresh `_t` query parameter per attempt to defeat intermediate caching.
//! Late attempts fall back to egress proxies when a pool is available.

pub mod egress;

pub use egress::EgressProxyPool;

use crate::common::encoding;
use crate::common::node::Protocol;
use crate::config::FetchConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Body plausibility verdict from the subscription validator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyVerdict {
    /// Recognisable subscription content
    Plausible,
    /// Unknown-looking but non-empty; returned for best-effort parsing
    BestEffort,
    /// Empty after trim; treated as a failed attempt
    Empty,
}

/// Classify a response body per the subscription validation rules
pub fn validate_body(body: &str) -> BodyVerdict {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return BodyVerdict::Empty;
    }
    let has_prefix = |s: &str| {
        Protocol::known_prefixes()
            .iter()
            .any(|prefix| s.contains(prefix))
    };
    if has_prefix(trimmed) {
        return BodyVerdict::Plausible;
    }
    if encoding::looks_like_base64(trimmed) {
        let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
        if let Ok(decoded) = encoding::decode_to_string(&compact) {
            if has_prefix(&decoded) {
                return BodyVerdict::Plausible;
            }
        }
    }
    if trimmed.contains("proxies:") || trimmed.contains("Proxy:") || trimmed.contains("- name:") {
        return BodyVerdict::Plausible;
    }
    if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        return BodyVerdict::Plausible;
    }
    BodyVerdict::BestEffort
}

/// Usage quota parsed from the Subscription-Userinfo header
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub upload: u64,
    pub download: u64,
    pub total: u64,
    pub expire: u64,
}

impl SubscriptionInfo {
    /// Parse `upload=xxx; download=xxx; total=xxx; expire=xxx`
    pub fn parse(header: &str) -> Option<Self> {
        let mut info = SubscriptionInfo::default();
        let mut seen = false;
        for part in header.split(';') {
            if let Some((key, value)) = part.trim().split_once('=') {
                let value: u64 = value.trim().parse().unwrap_or(0);
                match key.trim().to_lowercase().as_str() {
                    "upload" => info.upload = value,
                    "download" => info.download = value,
                    "total" => info.total = value,
                    "expire" => info.expire = value,
                    _ => continue,
                }
                seen = true;
            }
        }
        seen.then_some(info)
    }
}

/// Successful fetch result
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub body: String,
    pub status: u16,
    pub final_url: String,
    pub verdict: BodyVerdict,
    pub subscription_info: Option<SubscriptionInfo>,
}

/// Multi-attempt subscription fetcher
pub struct Fetcher {
    config: FetchConfig,
    egress: Option<Arc<EgressProxyPool>>,
}

impl Fetcher {
    pub fn new(config: FetchConfig) -> Self {
        Fetcher {
            config,
            egress: None,
        }
    }

    /// Attach the egress proxy pool used for late-attempt fallback
    pub fn with_egress(mut self, pool: Arc<EgressProxyPool>) -> Self {
        self.egress = Some(pool);
        self
    }

    /// Fetch a subscription URL, rotating user agents and backing off.
    ///
    /// `require_egress` forces proxying from the first attempt (sources
    /// marked as needing a regional egress).
    pub async fn fetch(&self, url: &str, require_egress: bool) -> Result<FetchResponse> {
        let ua_count = self.config.user_agents.len() as u32;
        let total_attempts = self.config.max_retries * ua_count;
        let mut last_err = Error::fetch(format!("no attempts made for {}", url));

        for attempt in 0..total_attempts {
            // Advance to the next UA every max_retries attempts
            let ua_index = (attempt / self.config.max_retries) as usize % ua_count as usize;
            let ua = &self.config.user_agents[ua_index];

            let use_egress = require_egress || attempt >= self.config.egress_fallback_threshold;
            let proxy_url = if use_egress {
                self.egress.as_ref().and_then(|pool| pool.next())
            } else {
                None
            };

            match self.attempt(url, ua, proxy_url.as_deref()).await {
                Ok(response) => match response.verdict {
                    BodyVerdict::Empty => {
                        last_err = Error::fetch(format!("{} returned an empty body", url));
                    }
                    _ => {
                        if response.verdict == BodyVerdict::BestEffort {
                            warn!("{} returned unrecognised content, best-effort parse", url);
                        }
                        return Ok(response);
                    }
                },
                Err(e) => {
                    let is_rate_limited = matches!(&e, Error::Fetch(msg) if msg.contains("429"));
                    debug!("fetch attempt {} for {} failed: {}", attempt + 1, url, e);
                    last_err = e;
                    if is_rate_limited {
                        tokio::time::sleep(Duration::from_millis(self.config.rate_limit_sleep_ms))
                            .await;
                    }
                }
            }

            // Exponential backoff within the current UA window
            let exponent = (attempt % self.config.max_retries) as i32;
            let delay = self.config.backoff_base_ms as f64 * 1.5_f64.powi(exponent);
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }

        Err(Error::fetch(format!(
            "all {} attempts for {} failed, last error: {}",
            total_attempts, url, last_err
        )))
    }

    async fn attempt(&self, url: &str, ua: &str, proxy: Option<&str>) -> Result<FetchResponse> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .user_agent(ua);
        if let Some(proxy_url) = proxy {
            debug!("dialing {} via egress proxy {}", url, proxy_url);
            builder = builder.proxy(
                reqwest::Proxy::all(proxy_url).map_err(|e| Error::fetch(e.to_string()))?,
            );
        }
        let client = builder.build().map_err(|e| Error::fetch(e.to_string()))?;

        // Cache-buster per attempt
        let separator = if url.contains('?') { '&' } else { '?' };
        let busted = format!(
            "{}{}_t={}",
            url,
            separator,
            chrono::Utc::now().timestamp_millis()
        );

        let response = client.get(&busted).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch(format!("{} returned HTTP {}", url, status.as_u16())));
        }

        let subscription_info = response
            .headers()
            .get("subscription-userinfo")
            .and_then(|v| v.to_str().ok())
            .and_then(SubscriptionInfo::parse);
        let final_url = response.url().to_string();
        let body = response.text().await?;
        let verdict = validate_body(&body);

        Ok(FetchResponse {
            body,
            status: status.as_u16(),
            final_url,
            verdict,
            subscription_info,
        })
    }
}
