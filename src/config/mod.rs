//! Configuration module

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How a subscription source delivers its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Remote URL returning any supported format
    #[default]
    Url,
    /// Remote URL returning a base64 envelope
    Base64,
    /// A single proxy URI inlined in the config
    SingleUri,
}

/// One upstream subscription source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSource {
    pub name: String,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Inline payload for `single-uri` sources
    #[serde(
        rename = "inline-content",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub inline_content: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Fetch through an egress proxy from the first attempt
    #[serde(rename = "require-regional-egress", default)]
    pub require_regional_egress: bool,
}

/// Fetcher tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Attempts per user agent before rotating
    #[serde(rename = "max-retries")]
    pub max_retries: u32,
    /// Per-attempt timeout in seconds
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,
    /// Attempt index from which egress proxies are tried
    #[serde(rename = "egress-fallback-threshold")]
    pub egress_fallback_threshold: u32,
    /// Base backoff delay in milliseconds
    #[serde(rename = "backoff-base-ms")]
    pub backoff_base_ms: u64,
    /// Extra sleep after HTTP 429, in milliseconds
    #[serde(rename = "rate-limit-sleep-ms")]
    pub rate_limit_sleep_ms: u64,
    /// User agents to rotate through
    #[serde(rename = "user-agents")]
    pub user_agents: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            max_retries: 3,
            timeout_secs: 20,
            egress_fallback_threshold: 3,
            backoff_base_ms: 500,
            rate_limit_sleep_ms: 3000,
            user_agents: default_user_agents(),
        }
    }
}

fn default_user_agents() -> Vec<String> {
    vec![
        "clash-verge/v1.6.6".to_string(),
        "ClashforWindows/0.20.39".to_string(),
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36".to_string(),
        "v2rayN/6.45".to_string(),
    ]
}

/// Prober tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Worker pool size
    pub concurrency: usize,
    /// Per-node probe timeout in seconds
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,
    /// URL fetched through http/socks5 nodes
    #[serde(rename = "test-url")]
    pub test_url: String,
    /// Latency at or above this is demoted to down, in milliseconds
    #[serde(rename = "high-latency-floor-ms")]
    pub high_latency_floor_ms: u64,
    /// Compare probe-resolved country with the name hint
    #[serde(rename = "verify-location")]
    pub verify_location: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            concurrency: 16,
            timeout_secs: 5,
            test_url: "http://www.gstatic.com/generate_204".to_string(),
            high_latency_floor_ms: 1000,
            verify_location: false,
        }
    }
}

/// IP locator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocateConfig {
    /// Disk cache TTL in days
    #[serde(rename = "cache-ttl-days")]
    pub cache_ttl_days: i64,
    /// Per-call timeout in seconds
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,
    /// Custom provider URL template, `{ip}` substituted (IP_API_URL)
    #[serde(rename = "custom-provider-url", skip_serializing_if = "Option::is_none")]
    pub custom_provider_url: Option<String>,
    /// API key for the custom provider (IP_API_KEY)
    #[serde(rename = "custom-provider-key", skip_serializing_if = "Option::is_none")]
    pub custom_provider_key: Option<String>,
}

impl Default for LocateConfig {
    fn default() -> Self {
        LocateConfig {
            cache_ttl_days: 7,
            timeout_secs: 6,
            custom_provider_url: None,
            custom_provider_key: None,
        }
    }
}

/// Node filtering applied after the probe pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Drop nodes slower than this, in milliseconds (0 = no cap)
    #[serde(rename = "max-latency-ms")]
    pub max_latency_ms: u64,
    /// Keep at most this many nodes (0 = unlimited)
    #[serde(rename = "max-nodes")]
    pub max_nodes: usize,
    /// Country codes excluded from the final set
    #[serde(rename = "excluded-countries")]
    pub excluded_countries: Vec<String>,
    /// Jurisdiction harvested for the egress proxy cache
    #[serde(rename = "egress-country")]
    pub egress_country: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            max_latency_ms: 0,
            max_nodes: 0,
            excluded_countries: vec!["CN".to_string()],
            egress_country: "CN".to_string(),
        }
    }
}

/// Declarative meta-group definition
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MetaGroupConfig {
    pub name: String,
    /// Other group display names whose members are unioned in
    #[serde(rename = "include-groups")]
    pub include_groups: Vec<String>,
    /// Classification tags whose carriers are unioned in
    #[serde(rename = "include-by-tag")]
    pub include_by_tag: Vec<String>,
    #[serde(rename = "include-direct")]
    pub include_direct: bool,
    #[serde(rename = "include-reject")]
    pub include_reject: bool,
    /// Extra member names appended verbatim
    #[serde(rename = "include-custom")]
    pub include_custom: Vec<String>,
}

/// Notification settings (Bark)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NotifyConfig {
    /// Bark endpoint, e.g. https://api.day.app/KEY (BARK_URL)
    #[serde(rename = "bark-url", skip_serializing_if = "Option::is_none")]
    pub bark_url: Option<String>,
    /// Notification title (BARK_TITLE)
    #[serde(rename = "bark-title", skip_serializing_if = "Option::is_none")]
    pub bark_title: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Subscription sources, fetched in declaration order
    pub sources: Vec<SubscriptionSource>,

    pub fetch: FetchConfig,
    pub probe: ProbeConfig,
    pub locate: LocateConfig,
    pub filter: FilterConfig,

    /// Meta-groups layered over the derived region/service groups
    #[serde(rename = "meta-groups")]
    pub meta_groups: Vec<MetaGroupConfig>,

    pub notify: NotifyConfig,

    /// State directory (caches, sync status, snapshots)
    #[serde(rename = "data-dir")]
    pub data_dir: PathBuf,
    /// Artifact directory
    #[serde(rename = "output-dir")]
    pub output_dir: PathBuf,

    /// HTTP facade listen address
    pub listen: String,

    /// Log level (LOG_LEVEL overrides)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            sources: Vec::new(),
            fetch: FetchConfig::default(),
            probe: ProbeConfig::default(),
            locate: LocateConfig::default(),
            filter: FilterConfig::default(),
            meta_groups: default_meta_groups(),
            notify: NotifyConfig::default(),
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            listen: "0.0.0.0:8080".to_string(),
            log_level: None,
        }
    }
}

fn default_meta_groups() -> Vec<MetaGroupConfig> {
    vec![MetaGroupConfig {
        name: "🚀 节点选择".to_string(),
        include_groups: vec![
            "🇭🇰 香港节点".to_string(),
            "🇸🇬 新加坡节点".to_string(),
            "🇺🇸 美国节点".to_string(),
            "🇯🇵 日本节点".to_string(),
            "🇹🇼 台湾节点".to_string(),
            "Others".to_string(),
        ],
        include_by_tag: Vec::new(),
        include_direct: true,
        include_reject: false,
        include_custom: Vec::new(),
    }]
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load from string
    pub fn from_str(content: &str) -> Result<Self> {
        let mut config: Config =
            serde_yaml::from_str(content).map_err(|e| Error::config(e.to_string()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Fold recognised environment variables into the config
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("BARK_URL") {
            if !url.is_empty() {
                self.notify.bark_url = Some(url);
            }
        }
        if let Ok(title) = std::env::var("BARK_TITLE") {
            if !title.is_empty() {
                self.notify.bark_title = Some(title);
            }
        }
        if let Ok(url) = std::env::var("IP_API_URL") {
            if !url.is_empty() {
                self.locate.custom_provider_url = Some(url);
            }
        }
        if let Ok(key) = std::env::var("IP_API_KEY") {
            if !key.is_empty() {
                self.locate.custom_provider_key = Some(key);
            }
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            if !level.is_empty() {
                self.log_level = Some(level);
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for source in &self.sources {
            match source.kind {
                SourceKind::Url | SourceKind::Base64 => {
                    if source.url.as_deref().unwrap_or("").is_empty() {
                        return Err(Error::config(format!(
                            "source `{}` requires a url",
                            source.name
                        )));
                    }
                }
                SourceKind::SingleUri => {
                    if source.inline_content.as_deref().unwrap_or("").is_empty() {
                        return Err(Error::config(format!(
                            "source `{}` requires inline-content",
                            source.name
                        )));
                    }
                }
            }
        }
        if self.fetch.max_retries == 0 {
            return Err(Error::config("fetch.max-retries must be at least 1"));
        }
        if self.fetch.user_agents.is_empty() {
            return Err(Error::config("fetch.user-agents must not be empty"));
        }
        if self.probe.concurrency == 0 {
            return Err(Error::config("probe.concurrency must be at least 1"));
        }
        Ok(())
    }

    /// Enabled sources in declaration order
    pub fn enabled_sources(&self) -> impl Iterator<Item = &SubscriptionSource> {
        self.sources.iter().filter(|s| s.enabled)
    }

    /// Path of the egress proxy cache file
    pub fn egress_cache_path(&self) -> PathBuf {
        self.data_dir.join("ip_cache").join("china_proxies.json")
    }

    /// Path of the sharded IP location cache directory
    pub fn ip_cache_dir(&self) -> PathBuf {
        self.data_dir.join("ip_cache")
    }

    /// Path of the persisted sync status
    pub fn sync_status_path(&self) -> PathBuf {
        self.data_dir.join("sync_status.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fetch.max_retries, 3);
        assert_eq!(config.probe.high_latency_floor_ms, 1000);
        assert_eq!(config.locate.cache_ttl_days, 7);
        assert_eq!(config.filter.excluded_countries, vec!["CN"]);
    }

    #[test]
    fn test_parse_sources() {
        let yaml = r#"
sources:
  - name: main
    url: https://example.com/sub
  - name: inline
    kind: single-uri
    inline-content: "trojan://pw@h:443#x"
  - name: disabled
    url: https://example.com/other
    enabled: false
probe:
  concurrency: 8
"#;
        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.sources.len(), 3);
        assert_eq!(config.enabled_sources().count(), 2);
        assert_eq!(config.probe.concurrency, 8);
        assert!(config.sources[0].enabled);
        assert_eq!(config.sources[1].kind, SourceKind::SingleUri);
    }

    #[test]
    fn test_validate_rejects_urlless_source() {
        let yaml = r#"
sources:
  - name: broken
"#;
        assert!(Config::from_str(yaml).is_err());
    }

    #[test]
    fn test_paths() {
        let config = Config::default();
        assert!(config
            .egress_cache_path()
            .ends_with("ip_cache/china_proxies.json"));
        assert!(config.sync_status_path().ends_with("sync_status.json"));
    }
}
