//! Format detection and subscription parsing
//!
//! A subscription payload arrives as an opaque string: Clash YAML, JSON,
//! a plain URI list, a base64 envelope around a URI list, or something in
//! between. The detector picks the most likely format; on decoder failure
//! every other decoder is tried in deterministic order before giving up.

pub mod clash;
pub mod uri;

pub use uri::decode_uri;

use crate::common::encoding;
use crate::common::node::{Node, Protocol};
use crate::{Error, Result};
use tracing::{debug, warn};

/// Detected subscription payload format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFormat {
    Yaml,
    Json,
    UriList,
    Base64,
}

impl SubscriptionFormat {
    const ALL: [SubscriptionFormat; 4] = [
        SubscriptionFormat::Yaml,
        SubscriptionFormat::Json,
        SubscriptionFormat::UriList,
        SubscriptionFormat::Base64,
    ];
}

/// Detect the payload format; first match wins
pub fn detect_format(body: &str) -> SubscriptionFormat {
    let trimmed = body.trim();

    // Clash YAML markers, or a block sequence of proxy records
    let has_clash_markers = trimmed.contains("proxies:")
        && (trimmed.contains("rules:") || trimmed.contains("proxy-groups:"));
    let has_record_sequence = trimmed.contains("- name:")
        && trimmed.contains("type:")
        && trimmed.contains("server:")
        && trimmed.contains("port:");
    if has_clash_markers || has_record_sequence {
        return SubscriptionFormat::Yaml;
    }

    if serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return SubscriptionFormat::Json;
    }

    if count_known_uris(trimmed) >= 2 {
        return SubscriptionFormat::UriList;
    }

    if encoding::looks_like_base64(trimmed) {
        if let Ok(decoded) = encoding::decode_to_string(&strip_whitespace(trimmed)) {
            if count_known_uris(&decoded) >= 1 {
                return SubscriptionFormat::Base64;
            }
        }
    }

    // Lenient fallback
    SubscriptionFormat::Yaml
}

/// Parse a subscription payload into validated nodes, tagged with the source
pub fn parse_subscription(body: &str, source_tag: &str) -> Result<Vec<Node>> {
    let detected = detect_format(body);
    debug!("source `{}` detected as {:?}", source_tag, detected);

    let mut last_err = None;
    let order = std::iter::once(detected)
        .chain(SubscriptionFormat::ALL.iter().copied().filter(|f| *f != detected));
    for format in order {
        match parse_as(body, format) {
            Ok(mut nodes) if !nodes.is_empty() => {
                for node in &mut nodes {
                    node.source_tag = source_tag.to_string();
                }
                return Ok(nodes);
            }
            Ok(_) => last_err = Some(Error::parse("payload produced no nodes")),
            Err(e) => {
                debug!("source `{}` not parseable as {:?}: {}", source_tag, format, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| Error::parse("unrecognised subscription payload")))
}

fn parse_as(body: &str, format: SubscriptionFormat) -> Result<Vec<Node>> {
    match format {
        SubscriptionFormat::Yaml => clash::parse_yaml(body),
        SubscriptionFormat::Json => clash::parse_json(body),
        SubscriptionFormat::UriList => parse_uri_list(body),
        SubscriptionFormat::Base64 => {
            let decoded = encoding::decode_to_string(&strip_whitespace(body.trim()))?;
            // One level of recursion: the envelope holds a plain URI list
            parse_uri_list(&decoded)
        }
    }
}

/// Parse one URI per line (or whitespace-separated), dropping failures
pub fn parse_uri_list(body: &str) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();
    for token in body.split_whitespace() {
        if !is_known_uri(token) {
            continue;
        }
        match decode_uri(token) {
            Ok(node) => nodes.push(node),
            Err(e) => warn!("dropping unparseable URI: {}", e),
        }
    }
    if nodes.is_empty() {
        return Err(Error::parse("no parseable URIs in payload"));
    }
    Ok(nodes)
}

fn is_known_uri(token: &str) -> bool {
    Protocol::known_prefixes()
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

fn count_known_uris(body: &str) -> usize {
    Protocol::known_prefixes()
        .iter()
        .map(|prefix| body.matches(prefix).count())
        .sum()
}

fn strip_whitespace(body: &str) -> String {
    body.chars().filter(|c| !c.is_whitespace()).collect()
}
