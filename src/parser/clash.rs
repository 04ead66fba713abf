//! Clash-style container decoding
//!
//! Decodes `proxies:` records from Clash/Mihomo YAML or JSON documents and
//! synthesizes canonical nodes without constructing a URI. Documents missing
//! a top-level `proxies:` sequence are still searched through
//! `proxy-providers:` entries carrying inline proxy lists.

use crate::common::node::{Node, Protocol};
use crate::{Error, Result};
use serde::Deserialize;
use tracing::debug;

/// Port fields arrive as numbers or strings depending on the generator
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Num(u16),
    Str(String),
}

impl PortValue {
    fn as_u16(&self) -> Option<u16> {
        match self {
            PortValue::Num(n) => Some(*n),
            PortValue::Str(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct WsHeaders {
    #[serde(rename = "Host")]
    host: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct WsOpts {
    path: Option<String>,
    headers: WsHeaders,
}

/// One Clash proxy record, the keys shared across client generators
#[derive(Debug, Clone, Deserialize)]
struct ClashProxy {
    name: Option<String>,
    #[serde(rename = "type")]
    proxy_type: String,
    server: String,
    port: PortValue,
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    cipher: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default, rename = "alterId")]
    alter_id: Option<u16>,
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    tls: Option<bool>,
    #[serde(default)]
    sni: Option<String>,
    #[serde(default)]
    servername: Option<String>,
    #[serde(default, rename = "ws-opts")]
    ws_opts: WsOpts,
    #[serde(default, rename = "skip-cert-verify")]
    skip_cert_verify: Option<bool>,
    #[serde(default)]
    flow: Option<String>,
    #[serde(default)]
    obfs: Option<String>,
    #[serde(default, rename = "obfs-password")]
    obfs_password: Option<String>,
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default, rename = "protocol-param")]
    protocol_param: Option<String>,
    #[serde(default, rename = "obfs-param")]
    obfs_param: Option<String>,
}

impl ClashProxy {
    fn into_node(self) -> Result<Node> {
        let protocol = match self.proxy_type.to_lowercase().as_str() {
            "ss" | "shadowsocks" => Protocol::Shadowsocks,
            "ssr" | "shadowsocksr" => Protocol::Shadowsocksr,
            "vmess" => Protocol::Vmess,
            "vless" => Protocol::Vless,
            "trojan" => Protocol::Trojan,
            "hysteria2" | "hy2" => Protocol::Hysteria2,
            "http" if self.tls == Some(true) => Protocol::Https,
            "http" => Protocol::Http,
            "https" => Protocol::Https,
            "socks5" | "socks" => Protocol::Socks5,
            other => {
                return Err(Error::parse(format!("unknown clash proxy type `{}`", other)));
            }
        };
        let port = self
            .port
            .as_u16()
            .ok_or_else(|| Error::parse("clash proxy has invalid port"))?;

        let mut node = Node::new(protocol, self.server, port);
        node.settings.uuid = self.uuid;
        node.settings.password = self.password;
        node.settings.method = self.cipher;
        node.settings.username = self.username;
        node.settings.alter_id = self.alter_id;
        node.settings.transport = self.network;
        node.settings.tls = self.tls;
        node.settings.sni = self.sni.or(self.servername);
        node.settings.ws_path = self.ws_opts.path;
        node.settings.ws_host = self.ws_opts.headers.host;
        node.settings.skip_cert_verify = self.skip_cert_verify;
        node.settings.flow = self.flow;
        node.settings.obfs = self.obfs;
        node.settings.obfs_param = self.obfs_password.or(self.obfs_param);
        node.settings.ssr_protocol = self.protocol;
        node.settings.ssr_protocol_param = self.protocol_param;
        if let Some(name) = self.name {
            node = node.with_name(&name);
        }
        node.validate()?;
        Ok(node)
    }
}

/// Decode nodes from a Clash YAML document
pub fn parse_yaml(content: &str) -> Result<Vec<Node>> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| Error::parse(format!("invalid YAML: {}", e)))?;
    let nodes = collect_yaml_nodes(&doc);
    if nodes.is_empty() {
        return Err(Error::parse("YAML document contains no proxies"));
    }
    Ok(nodes)
}

fn collect_yaml_nodes(doc: &serde_yaml::Value) -> Vec<Node> {
    let mut nodes = Vec::new();

    if let Some(proxies) = doc.get("proxies").and_then(|v| v.as_sequence()) {
        nodes.extend(proxies.iter().filter_map(yaml_record_to_node));
    }

    // proxy-providers with inline proxies (no top-level `proxies:`)
    if let Some(providers) = doc.get("proxy-providers").and_then(|v| v.as_mapping()) {
        for provider in providers.values() {
            if let Some(proxies) = provider.get("proxies").and_then(|v| v.as_sequence()) {
                nodes.extend(proxies.iter().filter_map(yaml_record_to_node));
            }
        }
    }

    // Lenient fallback: the document itself is a bare proxy sequence
    if nodes.is_empty() {
        if let Some(seq) = doc.as_sequence() {
            nodes.extend(seq.iter().filter_map(yaml_record_to_node));
        }
    }

    nodes
}

fn yaml_record_to_node(value: &serde_yaml::Value) -> Option<Node> {
    let proxy: ClashProxy = match serde_yaml::from_value(value.clone()) {
        Ok(p) => p,
        Err(e) => {
            debug!("skipping malformed clash record: {}", e);
            return None;
        }
    };
    match proxy.into_node() {
        Ok(node) => Some(node),
        Err(e) => {
            debug!("dropping invalid clash record: {}", e);
            None
        }
    }
}

/// Decode nodes from a JSON document (array of records, or an object with
/// `proxies` / `proxy-providers`)
pub fn parse_json(content: &str) -> Result<Vec<Node>> {
    let doc: serde_json::Value =
        serde_json::from_str(content).map_err(|e| Error::parse(format!("invalid JSON: {}", e)))?;
    let mut nodes = Vec::new();

    let record_lists: Vec<&serde_json::Value> = match &doc {
        serde_json::Value::Array(_) => vec![&doc],
        serde_json::Value::Object(obj) => {
            let mut lists = Vec::new();
            if let Some(proxies) = obj.get("proxies") {
                lists.push(proxies);
            }
            if let Some(providers) = obj.get("proxy-providers").and_then(|v| v.as_object()) {
                for provider in providers.values() {
                    if let Some(proxies) = provider.get("proxies") {
                        lists.push(proxies);
                    }
                }
            }
            lists
        }
        _ => Vec::new(),
    };

    for list in record_lists {
        if let Some(records) = list.as_array() {
            for record in records {
                let proxy: ClashProxy = match serde_json::from_value(record.clone()) {
                    Ok(p) => p,
                    Err(e) => {
                        debug!("skipping malformed JSON record: {}", e);
                        continue;
                    }
                };
                match proxy.into_node() {
                    Ok(node) => nodes.push(node),
                    Err(e) => debug!("dropping invalid JSON record: {}", e),
                }
            }
        }
    }

    if nodes.is_empty() {
        return Err(Error::parse("JSON document contains no proxies"));
    }
    Ok(nodes)
}
