//! Service and protocol alias tables

use crate::common::node::Protocol;
use regex::Regex;
use std::sync::OnceLock;

/// One application/service the classifier tags
#[derive(Debug)]
pub struct ServiceEntry {
    pub label: &'static str,
    pub aliases: &'static [&'static str],
}

/// Service alias table; aliases match case-insensitively on word boundaries
pub static SERVICES: &[ServiceEntry] = &[
    ServiceEntry {
        label: "Netflix",
        aliases: &["netflix", "nflx", "nf"],
    },
    ServiceEntry {
        label: "OpenAI",
        aliases: &["openai", "chatgpt", "gpt"],
    },
    ServiceEntry {
        label: "Disney+",
        aliases: &["disney+", "disney"],
    },
    ServiceEntry {
        label: "YouTube",
        aliases: &["youtube", "ytb"],
    },
    ServiceEntry {
        label: "Telegram",
        aliases: &["telegram", "tg"],
    },
    ServiceEntry {
        label: "TikTok",
        aliases: &["tiktok"],
    },
    ServiceEntry {
        label: "Spotify",
        aliases: &["spotify"],
    },
    ServiceEntry {
        label: "HBO",
        aliases: &["hbo"],
    },
    ServiceEntry {
        label: "Hulu",
        aliases: &["hulu"],
    },
    ServiceEntry {
        label: "Claude",
        aliases: &["claude", "anthropic"],
    },
    ServiceEntry {
        label: "Gemini",
        aliases: &["gemini"],
    },
    ServiceEntry {
        label: "Emby",
        aliases: &["emby"],
    },
    ServiceEntry {
        label: "Prime Video",
        aliases: &["prime video", "primevideo"],
    },
    ServiceEntry {
        label: "Bilibili",
        aliases: &["bilibili", "哔哩哔哩"],
    },
    ServiceEntry {
        label: "AbemaTV",
        aliases: &["abematv", "abema"],
    },
    ServiceEntry {
        label: "DAZN",
        aliases: &["dazn"],
    },
    ServiceEntry {
        label: "Paramount+",
        aliases: &["paramount+", "paramount"],
    },
    ServiceEntry {
        label: "Twitch",
        aliases: &["twitch"],
    },
    ServiceEntry {
        label: "Steam",
        aliases: &["steam"],
    },
    ServiceEntry {
        label: "Copilot",
        aliases: &["copilot"],
    },
    ServiceEntry {
        label: "Bahamut",
        aliases: &["bahamut", "动画疯", "巴哈姆特"],
    },
];

// Word boundaries only make sense between latin tokens; CJK aliases are
// matched by containment instead.
fn service_matchers() -> &'static Vec<Option<Regex>> {
    static MATCHERS: OnceLock<Vec<Option<Regex>>> = OnceLock::new();
    MATCHERS.get_or_init(|| {
        SERVICES
            .iter()
            .map(|entry| {
                let alternation = entry
                    .aliases
                    .iter()
                    .filter(|alias| alias.is_ascii())
                    .map(|alias| regex::escape(alias))
                    .collect::<Vec<_>>()
                    .join("|");
                if alternation.is_empty() {
                    return None;
                }
                Some(
                    Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))
                        .expect("static alias pattern"),
                )
            })
            .collect()
    })
}

/// All service tags present in a display name, deduplicated, table order
pub fn match_services(name: &str) -> Vec<&'static str> {
    SERVICES
        .iter()
        .zip(service_matchers().iter())
        .filter(|(entry, matcher)| {
            matcher.as_ref().map_or(false, |m| m.is_match(name))
                || entry
                    .aliases
                    .iter()
                    .any(|alias| !alias.is_ascii() && name.contains(alias))
        })
        .map(|(entry, _)| entry.label)
        .collect()
}

/// Protocol aliases recognised inside display names
static PROTOCOL_ALIASES: &[(&str, &str)] = &[
    ("vmess", "VMess"),
    ("v2ray", "VMess"),
    ("vless", "VLESS"),
    ("shadowsocksr", "SSR"),
    ("shadowsocks", "SS"),
    ("ssr", "SSR"),
    ("ss", "SS"),
    ("trojan", "Trojan"),
    ("hysteria2", "Hysteria2"),
    ("hy2", "Hysteria2"),
    ("https", "HTTPS"),
    ("http", "HTTP"),
    ("socks5", "SOCKS5"),
    ("socks", "SOCKS5"),
];

fn protocol_matcher() -> &'static Regex {
    static MATCHER: OnceLock<Regex> = OnceLock::new();
    MATCHER.get_or_init(|| {
        let alternation = PROTOCOL_ALIASES
            .iter()
            .map(|(alias, _)| regex::escape(alias))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"(?i)\b(?:{})\b", alternation)).expect("static alias pattern")
    })
}

/// Protocol label hinted by the display name, falling back to the node's
/// canonical protocol
pub fn match_protocol_label(name: &str, fallback: Protocol) -> &'static str {
    if let Some(found) = protocol_matcher().find(name) {
        let token = found.as_str().to_lowercase();
        for (alias, label) in PROTOCOL_ALIASES {
            if *alias == token {
                return label;
            }
        }
    }
    fallback.label()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_services_word_boundary() {
        assert_eq!(match_services("US Netflix unlock"), vec!["Netflix"]);
        assert_eq!(match_services("nf + gpt node"), vec!["Netflix", "OpenAI"]);
        // `nf` embedded in a word must not match
        assert!(match_services("confluence").is_empty());
    }

    #[test]
    fn test_match_services_dedup_order() {
        let tags = match_services("netflix NFLX chatgpt");
        assert_eq!(tags, vec!["Netflix", "OpenAI"]);
    }

    #[test]
    fn test_match_cjk_alias_by_containment() {
        assert_eq!(match_services("解锁哔哩哔哩"), vec!["Bilibili"]);
        assert_eq!(match_services("巴哈姆特/动画疯"), vec!["Bahamut"]);
    }

    #[test]
    fn test_match_protocol_label() {
        assert_eq!(match_protocol_label("trojan HK", Protocol::Vmess), "Trojan");
        assert_eq!(match_protocol_label("hy2 fast", Protocol::Vmess), "Hysteria2");
        assert_eq!(match_protocol_label("plain name", Protocol::Shadowsocks), "SS");
    }
}
