//! Artifact materialization
//!
//! Two artifact families: per-group URI lists (one line per node, the
//! original `raw` URI re-emitted verbatim when available) and per-client
//! configuration files generated by the format-specific generators.

pub mod clash;
pub mod singbox;
pub mod surge;
pub mod uri;
pub mod v2ray;

pub use uri::encode_uri;

use crate::common::node::{Node, Protocol};
use crate::group::{Group, GroupKind};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Category icon table keyed by group key
pub fn category_icons() -> BTreeMap<String, String> {
    const BASE: &str = "https://raw.githubusercontent.com/Koolson/Qure/master/IconSet/Color";
    let mut icons = BTreeMap::new();
    for (key, file) in [
        ("HK", "Hong_Kong.png"),
        ("TW", "Taiwan.png"),
        ("SG", "Singapore.png"),
        ("JP", "Japan.png"),
        ("US", "United_States.png"),
        ("KR", "Korea.png"),
        ("GB", "United_Kingdom.png"),
        ("others", "World_Map.png"),
        ("Netflix", "Netflix.png"),
        ("OpenAI", "ChatGPT.png"),
        ("Disney+", "Disney+.png"),
        ("YouTube", "YouTube.png"),
        ("Telegram", "Telegram.png"),
        ("Spotify", "Spotify.png"),
        ("TikTok", "TikTok.png"),
    ] {
        icons.insert(key.to_string(), format!("{}/{}", BASE, file));
    }
    icons
}

/// What a run materialized
#[derive(Debug, Default)]
pub struct EmitReport {
    pub group_files: Vec<String>,
    pub client_configs: Vec<String>,
    pub failures: Vec<String>,
}

impl EmitReport {
    pub fn artifact_count(&self) -> usize {
        self.group_files.len() + self.client_configs.len()
    }
}

/// The line emitted for a node: the original URI verbatim when still
/// valid, otherwise a synthesized canonical URI
pub fn uri_line(node: &Node) -> String {
    match &node.raw {
        Some(raw)
            if Protocol::known_prefixes()
                .iter()
                .any(|prefix| raw.starts_with(prefix)) =>
        {
            raw.clone()
        }
        _ => encode_uri(node),
    }
}

/// File stem for a group artifact
fn group_file_stem(group: &Group) -> String {
    let stem = match group.kind {
        GroupKind::Region if group.key == "others" => "Others".to_string(),
        _ => group.key.clone(),
    };
    stem.replace(['/', '\\'], "_")
}

/// Materializes artifacts under the output directory
pub struct Emitter {
    output_dir: PathBuf,
    icons: BTreeMap<String, String>,
}

impl Emitter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Emitter {
            output_dir: output_dir.as_ref().to_path_buf(),
            icons: category_icons(),
        }
    }

    /// Write all artifacts; fails only when nothing at all was produced
    pub fn emit_all(&self, nodes: &[Node], groups: &[Group]) -> Result<EmitReport> {
        let mut report = EmitReport::default();

        std::fs::create_dir_all(self.output_dir.join("groups"))?;

        // Per-group URI lists: region and service groups only. Meta groups
        // union the others and would duplicate every line. The canonical
        // "others" artifact is groups/Others.txt.
        for group in groups {
            if group.kind == GroupKind::Meta || group.members.is_empty() {
                continue;
            }
            let stem = group_file_stem(group);
            match self.write_group_list(group, &stem) {
                Ok(()) => report.group_files.push(format!("{}.txt", stem)),
                Err(e) => {
                    warn!("failed to write group list {}: {}", stem, e);
                    report.failures.push(format!("groups/{}.txt: {}", stem, e));
                }
            }
        }

        // Per-client configs
        let clients: [(&str, Result<String>); 4] = [
            ("mihomo.yaml", clash::generate(nodes, groups, &self.icons)),
            ("surge.conf", surge::generate(nodes, groups)),
            ("singbox.json", singbox::generate(nodes, groups)),
            ("v2ray.json", v2ray::generate(nodes)),
        ];
        for (file_name, generated) in clients {
            match generated.and_then(|content| {
                std::fs::write(self.output_dir.join(file_name), content).map_err(Error::Io)
            }) {
                Ok(()) => report.client_configs.push(file_name.to_string()),
                Err(e) => {
                    warn!("failed to emit {}: {}", file_name, e);
                    report.failures.push(format!("{}: {}", file_name, e));
                }
            }
        }

        if report.artifact_count() == 0 {
            return Err(Error::conversion("no artifacts were produced"));
        }
        info!(
            "emitted {} group lists and {} client configs",
            report.group_files.len(),
            report.client_configs.len()
        );
        Ok(report)
    }

    fn write_group_list(&self, group: &Group, stem: &str) -> Result<()> {
        let lines: Vec<String> = group.members.iter().map(uri_line).collect();
        // LF endings, no terminating blank line
        let content = lines.join("\n");

        let canonical = self.output_dir.join("groups").join(format!("{}.txt", stem));
        std::fs::write(&canonical, &content)?;
        // Legacy top-level copy, kept for old client URLs
        let legacy = self.output_dir.join(format!("{}.txt", stem));
        std::fs::write(&legacy, &content)?;
        Ok(())
    }

    /// Path of a group artifact by file stem
    pub fn group_artifact_path(&self, stem: &str) -> PathBuf {
        self.output_dir.join("groups").join(format!("{}.txt", stem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify;
    use crate::group::Grouper;
    use tempfile::tempdir;

    fn sample_nodes() -> Vec<Node> {
        let mut trojan =
            Node::new(Protocol::Trojan, "t.example", 443).with_name("🇭🇰 Trojan 01");
        trojan.settings.password = Some("pw".to_string());
        trojan.raw = Some("trojan://pw@t.example:443#%F0%9F%87%AD%F0%9F%87%B0%20Trojan%2001".to_string());
        let mut ss = Node::new(Protocol::Shadowsocks, "s.example", 8388).with_name("🇩🇪 SS 01");
        ss.settings.method = Some("aes-256-gcm".to_string());
        ss.settings.password = Some("secret".to_string());
        let mut nodes = vec![trojan, ss];
        for node in &mut nodes {
            classify::classify(node);
        }
        nodes
    }

    #[test]
    fn test_uri_line_prefers_raw_verbatim() {
        let nodes = sample_nodes();
        assert_eq!(uri_line(&nodes[0]), nodes[0].raw.clone().unwrap());
        // No raw: synthesized
        assert!(uri_line(&nodes[1]).starts_with("ss://"));
    }

    #[test]
    fn test_uri_line_rejects_invalid_raw() {
        let mut node = sample_nodes().remove(0);
        node.raw = Some("garbage-without-scheme".to_string());
        assert!(uri_line(&node).starts_with("trojan://"));
    }

    #[test]
    fn test_emit_all_writes_expected_tree() {
        let dir = tempdir().unwrap();
        let nodes = sample_nodes();
        let groups = Grouper::new(Vec::new()).build(&nodes);

        let report = Emitter::new(dir.path()).emit_all(&nodes, &groups).unwrap();
        assert!(report.artifact_count() >= 4);

        // HK regional group, canonical and legacy copies
        assert!(dir.path().join("groups/HK.txt").exists());
        assert!(dir.path().join("HK.txt").exists());
        // DE is outside the shortlist: it lands in Others
        assert!(dir.path().join("groups/Others.txt").exists());

        assert!(dir.path().join("mihomo.yaml").exists());
        assert!(dir.path().join("surge.conf").exists());
        assert!(dir.path().join("singbox.json").exists());
        assert!(dir.path().join("v2ray.json").exists());
    }

    #[test]
    fn test_group_file_content_lf_no_trailing_blank() {
        let dir = tempdir().unwrap();
        let nodes = sample_nodes();
        let groups = Grouper::new(Vec::new()).build(&nodes);
        Emitter::new(dir.path()).emit_all(&nodes, &groups).unwrap();

        let content = std::fs::read_to_string(dir.path().join("groups/HK.txt")).unwrap();
        assert!(!content.contains("\r\n"));
        assert!(!content.ends_with('\n'));
        // raw re-emitted verbatim
        assert_eq!(content, nodes[0].raw.clone().unwrap());
    }

    #[test]
    fn test_emit_empty_is_error() {
        let dir = tempdir().unwrap();
        let err = Emitter::new(dir.path()).emit_all(&[], &[]).unwrap_err();
        assert!(matches!(err, Error::Conversion(_)));
    }
}
