//! Surge configuration generation
//!
//! Surge uses an ini-like format; the `[Proxy]` and `[Proxy Group]`
//! regions of the template are replaced with generated lines. Protocols
//! Surge cannot express (vless, ssr) are skipped per node rather than
//! failing the artifact.

use crate::common::node::{Node, Protocol};
use crate::group::{Group, GroupKind, DEFAULT_TEST_INTERVAL, DEFAULT_TEST_TOLERANCE_MS, DEFAULT_TEST_URL};
use crate::{Error, Result};
use tracing::debug;

const TEMPLATE: &str = r#"[General]
loglevel = notify
dns-server = 223.5.5.5, 1.1.1.1
internet-test-url = http://www.gstatic.com/generate_204
proxy-test-url = http://www.gstatic.com/generate_204

[Proxy]
{{PROXIES}}

[Proxy Group]
{{PROXY_GROUPS}}

[Rule]
FINAL,{{FINAL}}
"#;

/// Render one node as a Surge proxy line, `None` for unsupported protocols
fn proxy_line(node: &Node) -> Option<String> {
    let settings = &node.settings;
    let mut parts: Vec<String> = Vec::new();

    match node.protocol {
        Protocol::Shadowsocks => {
            parts.push("ss".to_string());
            parts.push(node.server.clone());
            parts.push(node.port.to_string());
            parts.push(format!(
                "encrypt-method={}",
                settings.method.as_deref().unwrap_or_default()
            ));
            parts.push(format!(
                "password={}",
                settings.password.as_deref().unwrap_or_default()
            ));
        }
        Protocol::Vmess => {
            parts.push("vmess".to_string());
            parts.push(node.server.clone());
            parts.push(node.port.to_string());
            parts.push(format!(
                "username={}",
                settings.uuid.as_deref().unwrap_or_default()
            ));
            if settings.transport.as_deref() == Some("ws") {
                parts.push("ws=true".to_string());
                if let Some(path) = &settings.ws_path {
                    parts.push(format!("ws-path={}", path));
                }
                if let Some(host) = &settings.ws_host {
                    parts.push(format!("ws-headers=Host:{}", host));
                }
            }
            if settings.tls == Some(true) {
                parts.push("tls=true".to_string());
                if let Some(sni) = &settings.sni {
                    parts.push(format!("sni={}", sni));
                }
            }
        }
        Protocol::Trojan => {
            parts.push("trojan".to_string());
            parts.push(node.server.clone());
            parts.push(node.port.to_string());
            parts.push(format!(
                "password={}",
                settings.password.as_deref().unwrap_or_default()
            ));
            if let Some(sni) = &settings.sni {
                parts.push(format!("sni={}", sni));
            }
            if settings.skip_cert_verify == Some(true) {
                parts.push("skip-cert-verify=true".to_string());
            }
        }
        Protocol::Hysteria2 => {
            parts.push("hysteria2".to_string());
            parts.push(node.server.clone());
            parts.push(node.port.to_string());
            parts.push(format!(
                "password={}",
                settings.password.as_deref().unwrap_or_default()
            ));
            if let Some(sni) = &settings.sni {
                parts.push(format!("sni={}", sni));
            }
            if settings.skip_cert_verify == Some(true) {
                parts.push("skip-cert-verify=true".to_string());
            }
        }
        Protocol::Http | Protocol::Https => {
            parts.push(if node.protocol == Protocol::Https {
                "https".to_string()
            } else {
                "http".to_string()
            });
            parts.push(node.server.clone());
            parts.push(node.port.to_string());
            if let Some(user) = &settings.username {
                parts.push(user.clone());
                parts.push(settings.password.clone().unwrap_or_default());
            }
        }
        Protocol::Socks5 => {
            parts.push("socks5".to_string());
            parts.push(node.server.clone());
            parts.push(node.port.to_string());
            if let Some(user) = &settings.username {
                parts.push(user.clone());
                parts.push(settings.password.clone().unwrap_or_default());
            }
        }
        Protocol::Vless | Protocol::Shadowsocksr => {
            debug!(
                "surge cannot express {}, skipping {}",
                node.protocol, node.display_name
            );
            return None;
        }
    }

    Some(format!("{} = {}", node.display_name, parts.join(", ")))
}

fn group_line(group: &Group) -> String {
    let mut members: Vec<String> = group
        .members
        .iter()
        .map(|node| node.display_name.clone())
        .collect();
    members.extend(group.extra_members.iter().cloned());

    match group.kind {
        GroupKind::Meta => format!("{} = select, {}", group.display_name, members.join(", ")),
        _ => format!(
            "{} = url-test, {}, url = {}, interval = {}, tolerance = {}",
            group.display_name,
            members.join(", "),
            DEFAULT_TEST_URL,
            DEFAULT_TEST_INTERVAL,
            DEFAULT_TEST_TOLERANCE_MS
        ),
    }
}

/// Generate the Surge config for the final node and group lists
pub fn generate(nodes: &[Node], groups: &[Group]) -> Result<String> {
    let proxy_lines: Vec<String> = nodes.iter().filter_map(proxy_line).collect();
    if proxy_lines.is_empty() {
        return Err(Error::conversion("no surge-expressible nodes to emit"));
    }

    let emitted: std::collections::HashSet<String> = proxy_lines
        .iter()
        .filter_map(|line| line.split(" = ").next().map(|s| s.to_string()))
        .collect();

    // Groups must only reference proxies that made it into [Proxy]
    let group_lines: Vec<String> = groups
        .iter()
        .filter(|group| !group.is_empty())
        .map(|group| {
            let mut filtered = group.clone();
            filtered.members.retain(|node| emitted.contains(&node.display_name));
            filtered
        })
        .filter(|group| !group.is_empty())
        .map(|group| group_line(&group))
        .collect();

    let final_target = groups
        .iter()
        .find(|group| group.kind == GroupKind::Meta)
        .map(|group| group.display_name.clone())
        .unwrap_or_else(|| "DIRECT".to_string());

    Ok(TEMPLATE
        .replace("{{PROXIES}}", &proxy_lines.join("\n"))
        .replace("{{PROXY_GROUPS}}", &group_lines.join("\n"))
        .replace("{{FINAL}}", &final_target))
}
