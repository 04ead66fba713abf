//! Node classification and renaming
//!
//! Classification assigns region, protocol, and service tags from the
//! display name, falling back to resolved geolocation for the region. The
//! namer then rewrites display names to a uniform template and renumbers
//! nodes by their position in the final list.

pub mod country;
pub mod service;

pub use country::{match_country, CountryEntry, COUNTRIES};
pub use service::{match_protocol_label, match_services};

use crate::common::node::{GeoInfo, Node};
use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Everything the classifier extracted from one display name
#[derive(Debug)]
pub struct Classification {
    pub country: Option<&'static CountryEntry>,
    pub protocol_label: &'static str,
    pub number: Option<u32>,
    pub services: Vec<&'static str>,
}

/// Last integer preceded by a non-alphanumeric character
pub fn extract_number(name: &str) -> Option<u32> {
    static NUMBER: OnceLock<Regex> = OnceLock::new();
    let matcher = NUMBER.get_or_init(|| Regex::new(r"\d+").expect("static pattern"));

    let mut last = None;
    for found in matcher.find_iter(name) {
        let preceded_ok = match name[..found.start()].chars().last() {
            Some(c) => !c.is_ascii_alphanumeric(),
            None => false,
        };
        if preceded_ok {
            if let Ok(n) = found.as_str().parse() {
                last = Some(n);
            }
        }
    }
    last
}

/// Classify a display name
pub fn classify_name(name: &str, fallback: crate::common::node::Protocol) -> Classification {
    Classification {
        country: match_country(name),
        protocol_label: match_protocol_label(name, fallback),
        number: extract_number(name),
        services: match_services(name),
    }
}

/// Assign tags to a node and backfill a name-derived country into `geo`
/// when geolocation has not resolved one yet.
pub fn classify(node: &mut Node) {
    let classification = classify_name(&node.display_name, node.protocol);

    let country_code = classification
        .country
        .map(|entry| entry.code.to_string())
        .or_else(|| node.country_code().map(|c| c.to_string()));

    if let Some(entry) = classification.country {
        let geo_unresolved = node.country_code().is_none();
        if geo_unresolved {
            node.geo = Some(GeoInfo {
                country_code: Some(entry.code.to_string()),
                country_name: entry.name_en.to_string(),
                city: None,
                org: None,
                asn: None,
                resolved_at: Utc::now(),
            });
        }
    }

    let mut tags: Vec<String> = Vec::new();
    if let Some(code) = country_code {
        tags.push(code);
    }
    tags.push(classification.protocol_label.to_string());
    for service in &classification.services {
        tags.push(service.to_string());
    }
    let mut seen = std::collections::HashSet::new();
    tags.retain(|tag| seen.insert(tag.clone()));
    node.tags = tags;
}

/// Display-name rewrite template
///
/// Tokens: `{country}` (flag + code), `{protocol}`, `{tags}` (service
/// tags), `{number}` (two-digit position within the country).
#[derive(Debug, Clone)]
pub struct NameTemplate {
    template: String,
}

impl Default for NameTemplate {
    fn default() -> Self {
        NameTemplate {
            template: "{country} {protocol} {tags} {number}".to_string(),
        }
    }
}

impl NameTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        NameTemplate {
            template: template.into(),
        }
    }

    fn render(
        &self,
        country: Option<&'static CountryEntry>,
        protocol_label: &str,
        services: &[&'static str],
        number: u32,
    ) -> String {
        let country_token = country
            .map(|entry| format!("{} {}", entry.flag, entry.code))
            .unwrap_or_default();
        let rendered = self
            .template
            .replace("{country}", &country_token)
            .replace("{protocol}", protocol_label)
            .replace("{tags}", &services.join(" "))
            .replace("{number}", &format!("{:02}", number));
        collapse_whitespace(&rendered)
    }
}

fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rewrites display names over the post-filter node list.
///
/// The sequence number is assigned by final-list position within each
/// country, regardless of any number present in the source name.
pub struct Namer {
    template: NameTemplate,
}

impl Namer {
    pub fn new(template: NameTemplate) -> Self {
        Namer { template }
    }

    pub fn rename_all(&self, nodes: &mut [Node]) {
        let mut counters: HashMap<String, u32> = HashMap::new();

        for node in nodes.iter_mut() {
            let classification = classify_name(&node.display_name, node.protocol);
            let country = classification
                .country
                .or_else(|| node.country_code().and_then(country::find_by_code));

            let counter_key = country
                .map(|entry| entry.code.to_string())
                .unwrap_or_else(|| "others".to_string());
            let number = counters
                .entry(counter_key)
                .and_modify(|n| *n += 1)
                .or_insert(1);

            let renamed = self.template.render(
                country,
                classification.protocol_label,
                &classification.services,
                *number,
            );
            if renamed.is_empty() {
                continue;
            }
            if node.raw_display_name.is_none() {
                node.raw_display_name = Some(node.display_name.clone());
            }
            node.display_name = renamed;
        }
    }
}

impl Default for Namer {
    fn default() -> Self {
        Namer::new(NameTemplate::default())
    }
}

/// Apply a probe-verified location correction: swap the leading flag,
/// keep the original name, update `geo`.
pub fn correct_location(node: &mut Node, actual: &GeoInfo) {
    let actual_entry = actual
        .country_code
        .as_deref()
        .and_then(country::find_by_code);

    if let Some(entry) = actual_entry {
        for known in COUNTRIES {
            if node.display_name.starts_with(known.flag) {
                let original = node.display_name.clone();
                node.display_name = node
                    .display_name
                    .replacen(known.flag, entry.flag, 1);
                if node.raw_display_name.is_none() {
                    node.raw_display_name = Some(original);
                }
                break;
            }
        }
    }
    node.geo = Some(actual.clone());
}
