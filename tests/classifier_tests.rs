//! Classifier property tests over the public API

use subhub_rust::classify;
use subhub_rust::{Node, Protocol};

fn classified(name: &str) -> Node {
    let mut node = Node::new(Protocol::Trojan, "server.example", 443).with_name(name);
    classify::classify(&mut node);
    node
}

/// A display name containing the 🇺🇸 flag, or the token `US` not embedded
/// in another word, classifies as US
#[test]
fn us_property() {
    for name in ["🇺🇸 node", "Premium US 03", "us-west relay", "美国 01"] {
        let node = classified(name);
        assert_eq!(node.country_code(), Some("US"), "name: {}", name);
        assert!(node.tags.contains(&"US".to_string()), "name: {}", name);
    }
    // Embedded in another word: no match
    for name in ["cirrus cluster", "bonus node"] {
        let node = classified(name);
        assert_ne!(node.country_code(), Some("US"), "name: {}", name);
    }
}

/// `Netflix`, `nf`, or `nflx` on a word boundary, case-insensitive, tags
/// the node with Netflix
#[test]
fn netflix_property() {
    for name in ["Netflix unlock", "NF 01", "nflx HK", "NETFLIX+JP"] {
        let node = classified(name);
        assert!(
            node.tags.contains(&"Netflix".to_string()),
            "name: {}",
            name
        );
    }
    for name in ["confluence", "nflxy"] {
        let node = classified(name);
        assert!(
            !node.tags.contains(&"Netflix".to_string()),
            "name: {}",
            name
        );
    }
}

/// Tags preserve insertion order without duplicates: country, protocol,
/// then services
#[test]
fn tag_assembly_order() {
    let node = classified("🇭🇰 trojan Netflix nf Disney");
    assert_eq!(node.tags, vec!["HK", "Trojan", "Netflix", "Disney+"]);
}

/// The protocol tag falls back to the canonical protocol when the name
/// carries no alias
#[test]
fn protocol_tag_fallback() {
    let mut node = Node::new(Protocol::Hysteria2, "h.example", 443).with_name("plain 01");
    classify::classify(&mut node);
    assert!(node.tags.contains(&"Hysteria2".to_string()));
}
