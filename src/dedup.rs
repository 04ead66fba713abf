//! Fingerprint-keyed node deduplication

use crate::common::node::Node;
use std::collections::HashMap;

/// Fields projected into the deduplication key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyField {
    Server,
    Port,
    Protocol,
}

/// Deduplication options
#[derive(Debug, Clone)]
pub struct DedupOptions {
    pub key_fields: Vec<KeyField>,
    /// On collision keep the lower-latency incumbent when both were probed
    pub prefer_lower_latency: bool,
}

impl Default for DedupOptions {
    fn default() -> Self {
        DedupOptions {
            key_fields: vec![KeyField::Server, KeyField::Port, KeyField::Protocol],
            prefer_lower_latency: true,
        }
    }
}

fn project_key(node: &Node, fields: &[KeyField]) -> String {
    let mut key = String::new();
    for field in fields {
        match field {
            KeyField::Server => key.push_str(&node.server),
            KeyField::Port => key.push_str(&node.port.to_string()),
            KeyField::Protocol => key.push_str(node.protocol.as_str()),
        }
        key.push('|');
    }
    key
}

/// Collapse nodes sharing a fingerprint, preserving insertion order of the
/// surviving nodes. Deterministic for identical input.
pub fn dedup(nodes: Vec<Node>, options: &DedupOptions) -> Vec<Node> {
    let mut survivors: Vec<Node> = Vec::with_capacity(nodes.len());
    let mut index: HashMap<String, usize> = HashMap::with_capacity(nodes.len());

    for node in nodes {
        let key = project_key(&node, &options.key_fields);
        match index.get(&key) {
            None => {
                index.insert(key, survivors.len());
                survivors.push(node);
            }
            Some(&slot) => {
                if options.prefer_lower_latency {
                    let incumbent = &survivors[slot];
                    if let (Some(old), Some(new)) = (incumbent.latency_ms(), node.latency_ms()) {
                        if new < old {
                            survivors[slot] = node;
                        }
                    }
                    // Otherwise the earlier arrival stays
                }
            }
        }
    }

    survivors
}
