//! The sync orchestrator
//!
//! One `run` drives the whole pipeline: fetch every enabled source, parse,
//! dedup, classify, probe, filter, re-classify, group, emit, then refresh
//! the egress proxy cache and persist the run status. Per-source and
//! per-node failures never abort the run; only a failure to produce any
//! artifact at all is fatal.

use crate::classify::{self, Namer};
use crate::common::node::{Node, Protocol};
use crate::config::{Config, SourceKind};
use crate::dedup::{dedup, DedupOptions};
use crate::emit::{EmitReport, Emitter};
use crate::events::{Event, EventSink, LogSink};
use crate::fetch::{EgressProxyPool, Fetcher};
use crate::geo::IpLocator;
use crate::group::{Group, Grouper};
use crate::notify::BarkNotifier;
use crate::parser;
use crate::probe::{ProbeOutcome, Prober};
use crate::status::{Durations, SyncStatus};
use crate::{Error, Result};
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Everything a completed run produced
pub struct SyncReport {
    pub status: SyncStatus,
    pub emit: EmitReport,
    pub groups: Vec<Group>,
    pub regions_count: usize,
    pub protocols_count: usize,
    /// `(source name, error)` for sources that failed entirely
    pub source_errors: Vec<(String, String)>,
}

/// The orchestrator
pub struct SyncPipeline {
    config: Config,
    locator: Arc<IpLocator>,
    sinks: Vec<Box<dyn EventSink>>,
}

impl SyncPipeline {
    pub fn new(config: Config) -> Self {
        let locator = Arc::new(IpLocator::new(&config.locate, config.ip_cache_dir()));
        let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(LogSink)];
        if let Some(bark) = BarkNotifier::from_config(&config.notify) {
            sinks.push(Box::new(bark));
        }
        SyncPipeline {
            config,
            locator,
            sinks,
        }
    }

    /// Replace the event sinks (tests)
    pub fn with_sinks(mut self, sinks: Vec<Box<dyn EventSink>>) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    async fn emit_event(&self, event: Event) {
        for sink in &self.sinks {
            sink.emit(&event).await;
        }
    }

    /// Run the full pipeline once. On fatal error a system-error event is
    /// emitted before the error is returned.
    pub async fn run(&self) -> Result<SyncReport> {
        match self.run_inner().await {
            Ok(report) => Ok(report),
            Err(e) => {
                self.emit_event(Event::system_error(e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn run_inner(&self) -> Result<SyncReport> {
        let previous = SyncStatus::load(self.config.sync_status_path());
        let previous_count = previous.as_ref().map_or(0, |s| s.final_node_count);

        let egress = Arc::new(EgressProxyPool::load(self.config.egress_cache_path()));
        let fetcher = Fetcher::new(self.config.fetch.clone()).with_egress(Arc::clone(&egress));

        // Fetch + parse every enabled source in declaration order
        let fetch_started = Instant::now();
        let mut nodes: Vec<Node> = Vec::new();
        let mut source_errors: Vec<(String, String)> = Vec::new();
        for source in self.config.enabled_sources() {
            match self.collect_source(&fetcher, source).await {
                Ok(mut parsed) => {
                    info!("source `{}` yielded {} nodes", source.name, parsed.len());
                    nodes.append(&mut parsed);
                }
                Err(e) => {
                    warn!("source `{}` failed: {}", source.name, e);
                    source_errors.push((source.name.clone(), e.to_string()));
                }
            }
        }
        let fetch_ms = fetch_started.elapsed().as_millis() as u64;
        let input_node_count = nodes.len();

        self.write_snapshot("raw_nodes.json", &nodes);

        // Dedup the union, then give the prober a name-derived country hint
        let mut nodes = dedup(nodes, &DedupOptions::default());
        let valid_node_count = nodes.len();
        for node in &mut nodes {
            classify::classify(node);
        }
        info!(
            "{} nodes after dedup (from {} parsed)",
            valid_node_count, input_node_count
        );

        // Probe
        let probe_started = Instant::now();
        let prober = Prober::new(self.config.probe.clone()).with_locator(Arc::clone(&self.locator));
        let input_order: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (node.id.clone(), index))
            .collect();
        let mut outcomes = prober.probe_all(nodes).await;
        // Probe completion order is arbitrary; restore input order so the
        // node cap and final numbering are stable for identical inputs
        outcomes.sort_by_key(|outcome| {
            input_order
                .get(&outcome.node.id)
                .copied()
                .unwrap_or(usize::MAX)
        });
        let probe_ms = probe_started.elapsed().as_millis() as u64;
        self.write_test_report(&outcomes);

        // Keep reachable nodes under the latency cap, with corrections applied
        let mut survivors: Vec<Node> = Vec::new();
        for outcome in outcomes {
            if !outcome.node.is_up() {
                continue;
            }
            if self.config.filter.max_latency_ms > 0 {
                if let Some(latency) = outcome.latency_ms {
                    if latency > self.config.filter.max_latency_ms {
                        continue;
                    }
                }
            }
            let mut node = outcome.node;
            if outcome.location_mismatch {
                if let Some(actual) = &outcome.actual_geo {
                    classify::correct_location(&mut node, actual);
                }
            }
            survivors.push(node);
        }

        // The node cap belongs to this filter stage, ahead of the
        // jurisdiction filter below
        if self.config.filter.max_nodes > 0 && survivors.len() > self.config.filter.max_nodes {
            survivors.truncate(self.config.filter.max_nodes);
        }

        // Final classification pass over the corrected set
        for node in &mut survivors {
            classify::classify(node);
        }

        // Egress harvest reads the final classification, before the
        // excluded jurisdiction is dropped from the artifact set
        self.harvest_egress(&survivors);

        let mut finals: Vec<Node> = survivors
            .into_iter()
            .filter(|node| {
                node.country_code().map_or(true, |code| {
                    !self
                        .config
                        .filter
                        .excluded_countries
                        .iter()
                        .any(|excluded| excluded == code)
                })
            })
            .collect();

        // Renumber and group
        Namer::default().rename_all(&mut finals);
        let groups = Grouper::new(self.config.meta_groups.clone()).build(&finals);
        self.write_snapshot("final_nodes.json", &finals);

        // Emit
        let emit_started = Instant::now();
        let emit_report = if finals.is_empty() {
            warn!("no nodes survived filtering, skipping artifact generation");
            EmitReport::default()
        } else {
            Emitter::new(&self.config.output_dir).emit_all(&finals, &groups)?
        };
        let emit_ms = emit_started.elapsed().as_millis() as u64;

        // Cache maintenance
        self.locator.purge_expired();

        let regions: HashSet<&str> = finals.iter().filter_map(|n| n.country_code()).collect();
        let protocols: HashSet<Protocol> = finals.iter().map(|n| n.protocol).collect();

        let status = SyncStatus {
            last_run_at: Utc::now(),
            input_node_count,
            valid_node_count,
            final_node_count: finals.len(),
            durations: Durations {
                fetch: fetch_ms,
                probe: probe_ms,
                emit: emit_ms,
            },
        };
        status.save(self.config.sync_status_path())?;

        self.emit_event(Event::sync_completed(
            finals.len(),
            previous_count,
            fetch_ms,
            probe_ms,
            emit_ms,
            regions.len(),
            protocols.len(),
        ))
        .await;

        Ok(SyncReport {
            status,
            emit: emit_report,
            groups,
            regions_count: regions.len(),
            protocols_count: protocols.len(),
            source_errors,
        })
    }

    /// Fetch and parse one source into tagged nodes
    async fn collect_source(
        &self,
        fetcher: &Fetcher,
        source: &crate::config::SubscriptionSource,
    ) -> Result<Vec<Node>> {
        match source.kind {
            SourceKind::SingleUri => {
                let content = source
                    .inline_content
                    .as_deref()
                    .ok_or_else(|| Error::config("single-uri source without content"))?;
                let mut nodes = parser::parse_uri_list(content)?;
                for node in &mut nodes {
                    node.source_tag = source.name.clone();
                }
                Ok(nodes)
            }
            SourceKind::Url | SourceKind::Base64 => {
                let url = source
                    .url
                    .as_deref()
                    .ok_or_else(|| Error::config("url source without url"))?;
                let response = fetcher.fetch(url, source.require_regional_egress).await?;
                parser::parse_subscription(&response.body, &source.name)
            }
        }
    }

    /// Rewrite the egress cache from nodes in the egress jurisdiction
    fn harvest_egress(&self, nodes: &[Node]) {
        let egress_country = self.config.filter.egress_country.as_str();
        let candidates: Vec<String> = nodes
            .iter()
            .filter(|node| node.country_code() == Some(egress_country))
            .filter(|node| {
                matches!(
                    node.protocol,
                    Protocol::Http | Protocol::Https | Protocol::Socks5
                )
            })
            .map(|node| {
                let auth = match (&node.settings.username, &node.settings.password) {
                    (Some(user), Some(pass)) => format!(
                        "{}:{}@",
                        urlencoding::encode(user),
                        urlencoding::encode(pass)
                    ),
                    (Some(user), None) => format!("{}@", urlencoding::encode(user)),
                    _ => String::new(),
                };
                format!(
                    "{}://{}{}:{}",
                    node.protocol.scheme(),
                    auth,
                    node.server,
                    node.port
                )
            })
            .collect();

        if let Err(e) = EgressProxyPool::store(self.config.egress_cache_path(), &candidates) {
            warn!("failed to rewrite egress proxy cache: {}", e);
        } else {
            info!("harvested {} egress proxies", candidates.len());
        }
    }

    /// Debugging snapshot under the data directory
    fn write_snapshot(&self, file_name: &str, nodes: &[Node]) {
        let path = self.config.data_dir.join(file_name);
        let write = || -> Result<()> {
            std::fs::create_dir_all(&self.config.data_dir)?;
            std::fs::write(&path, serde_json::to_string_pretty(nodes)?)?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!("failed to write snapshot {}: {}", path.display(), e);
        }
    }

    /// Structured probe report for debugging
    fn write_test_report(&self, outcomes: &[ProbeOutcome]) {
        let report: Vec<serde_json::Value> = outcomes
            .iter()
            .map(|outcome| {
                json!({
                    "name": outcome.node.display_name,
                    "server": outcome.node.server,
                    "port": outcome.node.port,
                    "protocol": outcome.node.protocol.as_str(),
                    "status": if outcome.node.is_up() { "up" } else { "down" },
                    "latencyMs": outcome.latency_ms,
                    "error": outcome.error,
                    "locationMismatch": outcome.location_mismatch,
                })
            })
            .collect();
        let path = self.config.data_dir.join("test_report.json");
        let write = || -> Result<()> {
            std::fs::create_dir_all(&self.config.data_dir)?;
            std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
            Ok(())
        };
        if let Err(e) = write() {
            warn!("failed to write test report: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.data_dir = dir.join("data");
        config.output_dir = dir.join("output");
        config.probe.timeout_secs = 1;
        config.probe.concurrency = 4;
        config
    }

    #[tokio::test]
    async fn test_run_with_no_sources_emits_nothing_but_persists_status() {
        let dir = tempdir().unwrap();
        let pipeline = SyncPipeline::new(test_config(dir.path()))
            .with_sinks(vec![Box::new(LogSink)]);

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.status.final_node_count, 0);
        assert_eq!(report.emit.artifact_count(), 0);
        assert!(dir.path().join("data/sync_status.json").exists());
        assert!(dir.path().join("data/raw_nodes.json").exists());
        assert!(dir.path().join("data/test_report.json").exists());
    }

    #[tokio::test]
    async fn test_inline_source_flows_to_artifacts() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());

        // A local listener so one node probes up
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _guard = tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        config.sources = vec![crate::config::SubscriptionSource {
            name: "inline".to_string(),
            kind: SourceKind::SingleUri,
            url: None,
            inline_content: Some(format!(
                "vmess://{}",
                crate::common::encoding::encode(format!(
                    r#"{{"ps":"🇭🇰 test","add":"127.0.0.1","port":"{}","id":"u","aid":"0","net":"tcp","tls":"none"}}"#,
                    port
                ))
            )),
            enabled: true,
            require_regional_egress: false,
        }];

        let pipeline = SyncPipeline::new(config).with_sinks(vec![Box::new(LogSink)]);
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.status.input_node_count, 1);
        assert_eq!(report.status.final_node_count, 1);
        assert!(report.emit.artifact_count() > 0);
        assert!(dir.path().join("output/groups/HK.txt").exists());

        // Status feeds the next run's delta
        let saved = SyncStatus::load(dir.path().join("data/sync_status.json")).unwrap();
        assert_eq!(saved.final_node_count, 1);
    }

    async fn spawn_acceptor() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });
        port
    }

    fn inline_vmess(name: &str, port: u16) -> String {
        format!(
            "vmess://{}",
            crate::common::encoding::encode(format!(
                r#"{{"ps":"{}","add":"127.0.0.1","port":"{}","id":"u","aid":"0","net":"tcp","tls":"none"}}"#,
                name, port
            ))
        )
    }

    #[tokio::test]
    async fn test_max_nodes_caps_before_exclusion() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.filter.max_nodes = 2;

        let cn_port = spawn_acceptor().await;
        let hk_one_port = spawn_acceptor().await;
        let hk_two_port = spawn_acceptor().await;

        // Declaration order: CN first. The cap keeps [CN, HK one]; the
        // jurisdiction filter then drops CN, leaving a single node.
        config.sources = vec![crate::config::SubscriptionSource {
            name: "inline".to_string(),
            kind: SourceKind::SingleUri,
            url: None,
            inline_content: Some(
                [
                    inline_vmess("🇨🇳 cn", cn_port),
                    inline_vmess("🇭🇰 hk one", hk_one_port),
                    inline_vmess("🇭🇰 hk two", hk_two_port),
                ]
                .join("\n"),
            ),
            enabled: true,
            require_regional_egress: false,
        }];

        let pipeline = SyncPipeline::new(config).with_sinks(vec![Box::new(LogSink)]);
        let report = pipeline.run().await.unwrap();
        assert_eq!(report.status.input_node_count, 3);
        assert_eq!(report.status.final_node_count, 1);

        // The survivor is the first HK node, not the second
        let hk = std::fs::read_to_string(dir.path().join("output/groups/HK.txt")).unwrap();
        assert_eq!(hk.lines().count(), 1);
        let kept = crate::parser::decode_uri(hk.trim()).unwrap();
        assert_eq!(kept.port, hk_one_port);
    }

    #[tokio::test]
    async fn test_excluded_country_harvested_then_dropped() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());

        // Fake HTTP proxy: answers 204 to anything, so an http node
        // pointed at it probes up
        let proxy_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_port = proxy_listener.local_addr().unwrap().port();
        let _proxy = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = proxy_listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buffer = vec![0u8; 4096];
                    let mut request = Vec::new();
                    loop {
                        let Ok(read) = stream.read(&mut buffer).await else {
                            return;
                        };
                        if read == 0 {
                            return;
                        }
                        request.extend_from_slice(&buffer[..read]);
                        if request.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let _ = stream
                        .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                        .await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        // Plain TCP acceptor for the vmess node
        let tcp_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tcp_port = tcp_listener.local_addr().unwrap().port();
        let _tcp = tokio::spawn(async move {
            loop {
                let _ = tcp_listener.accept().await;
            }
        });

        config.sources = vec![crate::config::SubscriptionSource {
            name: "inline".to_string(),
            kind: SourceKind::SingleUri,
            url: None,
            inline_content: Some(format!(
                "http://127.0.0.1:{}#%F0%9F%87%A8%F0%9F%87%B3%20CN%20relay\nvmess://{}",
                proxy_port,
                crate::common::encoding::encode(format!(
                    r#"{{"ps":"🇭🇰 keep","add":"127.0.0.1","port":"{}","id":"u","aid":"0","net":"tcp","tls":"none"}}"#,
                    tcp_port
                ))
            )),
            enabled: true,
            require_regional_egress: false,
        }];

        let pipeline = SyncPipeline::new(config).with_sinks(vec![Box::new(LogSink)]);
        let report = pipeline.run().await.unwrap();

        // The CN node was harvested into the egress cache...
        let cache: Vec<String> = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("data/ip_cache/china_proxies.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(cache, vec![format!("http://127.0.0.1:{}", proxy_port)]);

        // ...but dropped from the artifacts
        assert_eq!(report.status.final_node_count, 1);
        let hk = std::fs::read_to_string(dir.path().join("output/groups/HK.txt")).unwrap();
        assert!(hk.contains("vmess://"));
        assert!(!dir.path().join("output/groups/CN.txt").exists());
    }

    #[tokio::test]
    async fn test_unreachable_source_is_recorded_not_fatal() {
        let dir = tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.fetch.max_retries = 1;
        config.fetch.timeout_secs = 1;
        config.fetch.backoff_base_ms = 1;
        config.fetch.user_agents = vec!["t".to_string()];
        config.sources = vec![crate::config::SubscriptionSource {
            name: "dead".to_string(),
            kind: SourceKind::Url,
            url: Some("http://127.0.0.1:1/sub".to_string()),
            inline_content: None,
            enabled: true,
            require_regional_egress: false,
        }];

        let pipeline = SyncPipeline::new(config).with_sinks(vec![Box::new(LogSink)]);
        let report = pipeline.run().await.unwrap();
        assert_eq!(report.source_errors.len(), 1);
        assert_eq!(report.source_errors[0].0, "dead");
    }
}
