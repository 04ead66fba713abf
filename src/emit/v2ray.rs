//! V2Ray JSON generation
//!
//! Emits every node as a tagged outbound; the first node is the default
//! route. Protocols V2Ray cannot express (ssr, hysteria2) are skipped.

use crate::common::node::{Node, Protocol};
use crate::{Error, Result};
use serde_json::{json, Value};
use tracing::debug;

fn stream_settings(node: &Node) -> Value {
    let settings = &node.settings;
    let mut stream = json!({
        "network": settings.transport.clone().unwrap_or_else(|| "tcp".to_string()),
    });
    let obj = stream.as_object_mut().expect("stream is an object");
    if settings.tls == Some(true) || node.protocol == Protocol::Trojan {
        obj.insert("security".to_string(), json!("tls"));
        obj.insert(
            "tlsSettings".to_string(),
            json!({
                "serverName": settings.sni.clone().unwrap_or_else(|| node.server.clone()),
                "allowInsecure": settings.skip_cert_verify.unwrap_or(false),
            }),
        );
    }
    if settings.transport.as_deref() == Some("ws") {
        obj.insert(
            "wsSettings".to_string(),
            json!({
                "path": settings.ws_path.clone().unwrap_or_else(|| "/".to_string()),
                "headers": { "Host": settings.ws_host.clone().unwrap_or_default() },
            }),
        );
    }
    stream
}

fn outbound(node: &Node) -> Option<Value> {
    let settings = &node.settings;
    let out = match node.protocol {
        Protocol::Vmess | Protocol::Vless => json!({
            "tag": node.display_name,
            "protocol": node.protocol.as_str(),
            "settings": {
                "vnext": [{
                    "address": node.server,
                    "port": node.port,
                    "users": [{
                        "id": settings.uuid.clone().unwrap_or_default(),
                        "alterId": settings.alter_id.unwrap_or(0),
                        "encryption": settings.encryption.clone().unwrap_or_else(|| "none".to_string()),
                        "security": "auto",
                    }],
                }],
            },
            "streamSettings": stream_settings(node),
        }),
        Protocol::Shadowsocks => json!({
            "tag": node.display_name,
            "protocol": "shadowsocks",
            "settings": {
                "servers": [{
                    "address": node.server,
                    "port": node.port,
                    "method": settings.method.clone().unwrap_or_default(),
                    "password": settings.password.clone().unwrap_or_default(),
                }],
            },
        }),
        Protocol::Trojan => json!({
            "tag": node.display_name,
            "protocol": "trojan",
            "settings": {
                "servers": [{
                    "address": node.server,
                    "port": node.port,
                    "password": settings.password.clone().unwrap_or_default(),
                }],
            },
            "streamSettings": stream_settings(node),
        }),
        Protocol::Http | Protocol::Https | Protocol::Socks5 => {
            let protocol = if node.protocol == Protocol::Socks5 {
                "socks"
            } else {
                "http"
            };
            let mut server = json!({
                "address": node.server,
                "port": node.port,
            });
            if let Some(user) = &settings.username {
                server.as_object_mut().expect("server is an object").insert(
                    "users".to_string(),
                    json!([{
                        "user": user,
                        "pass": settings.password.clone().unwrap_or_default(),
                    }]),
                );
            }
            json!({
                "tag": node.display_name,
                "protocol": protocol,
                "settings": { "servers": [server] },
            })
        }
        Protocol::Shadowsocksr | Protocol::Hysteria2 => {
            debug!(
                "v2ray cannot express {}, skipping {}",
                node.protocol, node.display_name
            );
            return None;
        }
    };
    Some(out)
}

/// Generate the V2Ray config for the final node list
pub fn generate(nodes: &[Node]) -> Result<String> {
    let outbounds: Vec<Value> = nodes.iter().filter_map(outbound).collect();
    if outbounds.is_empty() {
        return Err(Error::conversion("no v2ray-expressible nodes to emit"));
    }

    let config = json!({
        "log": { "loglevel": "warning" },
        "inbounds": [{
            "tag": "socks-in",
            "protocol": "socks",
            "listen": "127.0.0.1",
            "port": 10808,
            "settings": { "udp": true },
        }],
        "outbounds": outbounds,
    });

    serde_json::to_string_pretty(&config)
        .map_err(|e| Error::conversion(format!("v2ray config: {}", e)))
}
