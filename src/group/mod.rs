//! Group assembly from classified nodes
//!
//! Groups are always derived, never hand-authored: one regional group per
//! country encountered, an `Others` bucket outside the shortlist, one
//! group per service tag, and declarative meta-groups unioning the rest.

use crate::classify::country;
use crate::classify::service::SERVICES;
use crate::common::node::Node;
use crate::config::MetaGroupConfig;
use std::collections::HashSet;

/// URL used by url-test style groups in emitted client configs
pub const DEFAULT_TEST_URL: &str = "http://www.gstatic.com/generate_204";
/// Health check interval in seconds
pub const DEFAULT_TEST_INTERVAL: u32 = 300;
/// Latency tolerance in milliseconds before switching
pub const DEFAULT_TEST_TOLERANCE_MS: u32 = 150;

/// Countries that get their own regional group; everything else lands in
/// the `Others` bucket
pub const REGION_SHORTLIST: &[&str] = &["HK", "SG", "US", "JP", "TW"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Region,
    Service,
    Meta,
}

/// A named, derived subset of the final node list
#[derive(Debug, Clone)]
pub struct Group {
    pub key: String,
    pub display_name: String,
    pub kind: GroupKind,
    pub members: Vec<Node>,
    /// Synthetic selector entries (DIRECT, REJECT, custom names) appended
    /// by meta-groups for client config emission
    pub extra_members: Vec<String>,
}

impl Group {
    fn new(key: impl Into<String>, display_name: impl Into<String>, kind: GroupKind) -> Self {
        Group {
            key: key.into(),
            display_name: display_name.into(),
            kind,
            members: Vec::new(),
            extra_members: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.extra_members.is_empty()
    }
}

/// Builds the group list from classified nodes
pub struct Grouper {
    meta_groups: Vec<MetaGroupConfig>,
}

impl Grouper {
    pub fn new(meta_groups: Vec<MetaGroupConfig>) -> Self {
        Grouper { meta_groups }
    }

    /// Assemble regional, others, service, and meta groups, in that order
    pub fn build(&self, nodes: &[Node]) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();

        // Regional groups in order of first encounter
        let mut region_order: Vec<String> = Vec::new();
        for node in nodes {
            if let Some(code) = node.country_code() {
                if !region_order.iter().any(|c| c == code) {
                    region_order.push(code.to_string());
                }
            }
        }
        for code in &region_order {
            let entry = match country::find_by_code(code) {
                Some(entry) => entry,
                None => continue,
            };
            let mut group = Group::new(
                code.clone(),
                format!("{} {}节点", entry.flag, entry.name_zh),
                GroupKind::Region,
            );
            group.members = nodes
                .iter()
                .filter(|node| node.country_code() == Some(code.as_str()))
                .cloned()
                .collect();
            groups.push(group);
        }

        // Everything outside the shortlist
        let mut others = Group::new("others", "Others", GroupKind::Region);
        others.members = nodes
            .iter()
            .filter(|node| {
                node.country_code()
                    .map_or(true, |code| !REGION_SHORTLIST.contains(&code))
            })
            .cloned()
            .collect();
        groups.push(others);

        // One group per service tag carried by at least one node
        for service in SERVICES {
            let members: Vec<Node> = nodes
                .iter()
                .filter(|node| node.tags.iter().any(|tag| tag == service.label))
                .cloned()
                .collect();
            if members.is_empty() {
                continue;
            }
            let mut group = Group::new(service.label, service.label, GroupKind::Service);
            group.members = members;
            groups.push(group);
        }

        // Meta-groups union other groups by display name and by tag
        for meta in &self.meta_groups {
            let mut group = Group::new(meta.name.clone(), meta.name.clone(), GroupKind::Meta);
            let mut seen: HashSet<String> = HashSet::new();

            for wanted in &meta.include_groups {
                if let Some(source) = groups
                    .iter()
                    .find(|g| &g.display_name == wanted || &g.key == wanted)
                {
                    for node in &source.members {
                        if seen.insert(node.id.clone()) {
                            group.members.push(node.clone());
                        }
                    }
                }
            }
            for tag in &meta.include_by_tag {
                for node in nodes {
                    if node.tags.iter().any(|t| t == tag) && seen.insert(node.id.clone()) {
                        group.members.push(node.clone());
                    }
                }
            }
            if meta.include_direct {
                group.extra_members.push("DIRECT".to_string());
            }
            if meta.include_reject {
                group.extra_members.push("REJECT".to_string());
            }
            for custom in &meta.include_custom {
                group.extra_members.push(custom.clone());
            }
            groups.push(group);
        }

        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify;
    use crate::common::node::Protocol;

    fn classified(name: &str) -> Node {
        let mut node = Node::new(Protocol::Trojan, format!("{}.example", name), 443)
            .with_name(name);
        classify::classify(&mut node);
        node
    }

    #[test]
    fn test_regional_groups_in_encounter_order() {
        let nodes = vec![
            classified("🇯🇵 JP 01"),
            classified("🇭🇰 HK 01"),
            classified("🇯🇵 JP 02"),
        ];
        let groups = Grouper::new(Vec::new()).build(&nodes);
        assert_eq!(groups[0].key, "JP");
        assert_eq!(groups[0].display_name, "🇯🇵 日本节点");
        assert_eq!(groups[0].members.len(), 2);
        assert_eq!(groups[1].key, "HK");
    }

    #[test]
    fn test_others_excludes_shortlist() {
        let nodes = vec![
            classified("🇭🇰 HK 01"),
            classified("🇩🇪 DE 01"),
            classified("no-country node"),
        ];
        let groups = Grouper::new(Vec::new()).build(&nodes);
        let others = groups.iter().find(|g| g.key == "others").unwrap();
        assert_eq!(others.members.len(), 2);
        assert!(others.members.iter().all(|n| n.country_code() != Some("HK")));
    }

    #[test]
    fn test_service_groups() {
        let nodes = vec![
            classified("🇺🇸 Netflix 01"),
            classified("🇺🇸 US 02"),
            classified("🇸🇬 nf + gpt"),
        ];
        let groups = Grouper::new(Vec::new()).build(&nodes);
        let netflix = groups.iter().find(|g| g.key == "Netflix").unwrap();
        assert_eq!(netflix.kind, GroupKind::Service);
        assert_eq!(netflix.members.len(), 2);
        let openai = groups.iter().find(|g| g.key == "OpenAI").unwrap();
        assert_eq!(openai.members.len(), 1);
        assert!(groups.iter().all(|g| g.key != "Disney+"));
    }

    #[test]
    fn test_meta_group_union_dedups_members() {
        let meta = MetaGroupConfig {
            name: "All".to_string(),
            include_groups: vec!["🇭🇰 香港节点".to_string()],
            include_by_tag: vec!["HK".to_string()],
            include_direct: true,
            include_reject: false,
            include_custom: vec!["fallback".to_string()],
        };
        let nodes = vec![classified("🇭🇰 HK 01"), classified("🇭🇰 HK 02")];
        let groups = Grouper::new(vec![meta]).build(&nodes);
        let all = groups.iter().find(|g| g.key == "All").unwrap();
        // Union of the regional group and the tag query is the same two nodes
        assert_eq!(all.members.len(), 2);
        assert_eq!(all.extra_members, vec!["DIRECT", "fallback"]);
        assert_eq!(all.kind, GroupKind::Meta);
    }
}
