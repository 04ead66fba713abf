//! Clash/Mihomo YAML generation
//!
//! The client template carries `{{PROXIES}}` and `{{PROXY_GROUPS}}`
//! markers that are replaced with structured YAML fragments serialized
//! from typed records, never hand-concatenated strings.

use crate::common::node::{Node, Protocol};
use crate::group::{Group, GroupKind, DEFAULT_TEST_INTERVAL, DEFAULT_TEST_TOLERANCE_MS, DEFAULT_TEST_URL};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;

const TEMPLATE: &str = r#"mixed-port: 7890
allow-lan: false
mode: rule
log-level: info
external-controller: 127.0.0.1:9090
dns:
  enable: true
  enhanced-mode: fake-ip
  nameserver:
  - https://223.5.5.5/dns-query
  - https://1.1.1.1/dns-query
proxies:
{{PROXIES}}
proxy-groups:
{{PROXY_GROUPS}}
rules:
- MATCH,{{FINAL}}
"#;

#[derive(Debug, Serialize)]
struct WsHeadersOut {
    #[serde(rename = "Host")]
    host: String,
}

#[derive(Debug, Serialize)]
struct WsOptsOut {
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<WsHeadersOut>,
}

/// One Clash proxy record
#[derive(Debug, Serialize)]
struct ClashProxyOut {
    name: String,
    #[serde(rename = "type")]
    proxy_type: &'static str,
    server: String,
    port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    uuid: Option<String>,
    #[serde(rename = "alterId", skip_serializing_if = "Option::is_none")]
    alter_id: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cipher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    servername: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sni: Option<String>,
    #[serde(rename = "skip-cert-verify", skip_serializing_if = "Option::is_none")]
    skip_cert_verify: Option<bool>,
    #[serde(rename = "ws-opts", skip_serializing_if = "Option::is_none")]
    ws_opts: Option<WsOptsOut>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flow: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    obfs: Option<String>,
    #[serde(rename = "obfs-password", skip_serializing_if = "Option::is_none")]
    obfs_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    protocol: Option<String>,
    #[serde(rename = "protocol-param", skip_serializing_if = "Option::is_none")]
    protocol_param: Option<String>,
    #[serde(rename = "obfs-param", skip_serializing_if = "Option::is_none")]
    obfs_param: Option<String>,
    udp: bool,
}

fn proxy_record(node: &Node) -> ClashProxyOut {
    let settings = &node.settings;
    let proxy_type = match node.protocol {
        Protocol::Vmess => "vmess",
        Protocol::Vless => "vless",
        Protocol::Shadowsocks => "ss",
        Protocol::Shadowsocksr => "ssr",
        Protocol::Trojan => "trojan",
        Protocol::Hysteria2 => "hysteria2",
        Protocol::Http | Protocol::Https => "http",
        Protocol::Socks5 => "socks5",
    };
    let is_ws = settings.transport.as_deref() == Some("ws");
    let ws_opts = if is_ws && (settings.ws_path.is_some() || settings.ws_host.is_some()) {
        Some(WsOptsOut {
            path: settings.ws_path.clone(),
            headers: settings
                .ws_host
                .clone()
                .map(|host| WsHeadersOut { host }),
        })
    } else {
        None
    };
    // SSR splits obfs-param from hysteria2's obfs-password
    let (obfs_password, obfs_param) = match node.protocol {
        Protocol::Hysteria2 => (settings.obfs_param.clone(), None),
        _ => (None, settings.obfs_param.clone()),
    };

    ClashProxyOut {
        name: node.display_name.clone(),
        proxy_type,
        server: node.server.clone(),
        port: node.port,
        uuid: settings.uuid.clone(),
        alter_id: settings.alter_id,
        cipher: settings.method.clone(),
        password: settings.password.clone(),
        username: settings.username.clone(),
        network: settings.transport.clone().filter(|t| t != "tcp"),
        tls: settings.tls.filter(|enabled| *enabled)
            .or(if node.protocol == Protocol::Https { Some(true) } else { None }),
        servername: settings.sni.clone().filter(|_| node.protocol == Protocol::Vmess),
        sni: settings.sni.clone().filter(|_| node.protocol != Protocol::Vmess),
        skip_cert_verify: settings.skip_cert_verify,
        ws_opts,
        flow: settings.flow.clone(),
        obfs: settings.obfs.clone(),
        obfs_password,
        protocol: settings.ssr_protocol.clone(),
        protocol_param: settings.ssr_protocol_param.clone(),
        obfs_param,
        udp: true,
    }
}

/// One Clash proxy-group record
#[derive(Debug, Serialize)]
struct ClashGroupOut {
    name: String,
    #[serde(rename = "type")]
    group_type: &'static str,
    proxies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    interval: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tolerance: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon: Option<String>,
}

fn group_record(group: &Group, icon: Option<String>) -> ClashGroupOut {
    let mut proxies: Vec<String> = group
        .members
        .iter()
        .map(|node| node.display_name.clone())
        .collect();
    proxies.extend(group.extra_members.iter().cloned());

    // Meta groups are manual selectors; region/service groups auto-test
    let (group_type, url, interval, tolerance) = match group.kind {
        GroupKind::Meta => ("select", None, None, None),
        _ => (
            "url-test",
            Some(DEFAULT_TEST_URL.to_string()),
            Some(DEFAULT_TEST_INTERVAL),
            Some(DEFAULT_TEST_TOLERANCE_MS),
        ),
    };

    ClashGroupOut {
        name: group.display_name.clone(),
        group_type,
        proxies,
        url,
        interval,
        tolerance,
        icon,
    }
}

/// Generate the full Clash/Mihomo config for the final node and group lists
pub fn generate(
    nodes: &[Node],
    groups: &[Group],
    icons: &BTreeMap<String, String>,
) -> Result<String> {
    if nodes.is_empty() {
        return Err(Error::conversion("no nodes to emit into clash config"));
    }

    let proxies: Vec<ClashProxyOut> = nodes.iter().map(proxy_record).collect();
    let proxies_yaml = serde_yaml::to_string(&proxies)
        .map_err(|e| Error::conversion(format!("clash proxies: {}", e)))?;

    let group_records: Vec<ClashGroupOut> = groups
        .iter()
        .filter(|group| !group.is_empty())
        .map(|group| group_record(group, icons.get(&group.key).cloned()))
        .collect();
    let groups_yaml = serde_yaml::to_string(&group_records)
        .map_err(|e| Error::conversion(format!("clash proxy-groups: {}", e)))?;

    let final_target = groups
        .iter()
        .find(|group| group.kind == GroupKind::Meta)
        .map(|group| group.display_name.clone())
        .unwrap_or_else(|| "DIRECT".to_string());

    Ok(TEMPLATE
        .replace("{{PROXIES}}", proxies_yaml.trim_end())
        .replace("{{PROXY_GROUPS}}", groups_yaml.trim_end())
        .replace("{{FINAL}}", &final_target))
}
