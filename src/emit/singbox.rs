//! sing-box JSON generation

use crate::common::node::{Node, Protocol};
use crate::group::{Group, GroupKind, DEFAULT_TEST_INTERVAL, DEFAULT_TEST_URL};
use crate::{Error, Result};
use serde_json::{json, Value};

fn outbound(node: &Node) -> Value {
    let settings = &node.settings;
    let mut out = match node.protocol {
        Protocol::Shadowsocks => json!({
            "type": "shadowsocks",
            "method": settings.method.clone().unwrap_or_default(),
            "password": settings.password.clone().unwrap_or_default(),
        }),
        Protocol::Shadowsocksr => json!({
            "type": "shadowsocksr",
            "method": settings.method.clone().unwrap_or_default(),
            "password": settings.password.clone().unwrap_or_default(),
            "protocol": settings.ssr_protocol.clone().unwrap_or_default(),
            "protocol-param": settings.ssr_protocol_param.clone().unwrap_or_default(),
            "obfs": settings.obfs.clone().unwrap_or_default(),
            "obfs-param": settings.obfs_param.clone().unwrap_or_default(),
        }),
        Protocol::Vmess => json!({
            "type": "vmess",
            "uuid": settings.uuid.clone().unwrap_or_default(),
            "alter_id": settings.alter_id.unwrap_or(0),
            "security": "auto",
        }),
        Protocol::Vless => json!({
            "type": "vless",
            "uuid": settings.uuid.clone().unwrap_or_default(),
            "flow": settings.flow.clone().unwrap_or_default(),
        }),
        Protocol::Trojan => json!({
            "type": "trojan",
            "password": settings.password.clone().unwrap_or_default(),
        }),
        Protocol::Hysteria2 => json!({
            "type": "hysteria2",
            "password": settings.password.clone().unwrap_or_default(),
        }),
        Protocol::Http | Protocol::Https => json!({
            "type": "http",
            "username": settings.username.clone().unwrap_or_default(),
            "password": settings.password.clone().unwrap_or_default(),
        }),
        Protocol::Socks5 => json!({
            "type": "socks",
            "version": "5",
            "username": settings.username.clone().unwrap_or_default(),
            "password": settings.password.clone().unwrap_or_default(),
        }),
    };

    let obj = out.as_object_mut().expect("outbound is an object");
    obj.insert("tag".to_string(), json!(node.display_name));
    obj.insert("server".to_string(), json!(node.server));
    obj.insert("server_port".to_string(), json!(node.port));

    // Shared TLS block
    let wants_tls = settings.tls == Some(true)
        || matches!(node.protocol, Protocol::Trojan | Protocol::Hysteria2)
        || node.protocol == Protocol::Https;
    if wants_tls {
        obj.insert(
            "tls".to_string(),
            json!({
                "enabled": true,
                "server_name": settings.sni.clone().unwrap_or_else(|| node.server.clone()),
                "insecure": settings.skip_cert_verify.unwrap_or(false),
            }),
        );
    }
    if settings.transport.as_deref() == Some("ws") {
        obj.insert(
            "transport".to_string(),
            json!({
                "type": "ws",
                "path": settings.ws_path.clone().unwrap_or_else(|| "/".to_string()),
                "headers": { "Host": settings.ws_host.clone().unwrap_or_default() },
            }),
        );
    }

    out
}

fn group_outbound(group: &Group) -> Value {
    let mut members: Vec<String> = group
        .members
        .iter()
        .map(|node| node.display_name.clone())
        .collect();
    members.extend(
        group
            .extra_members
            .iter()
            .map(|name| {
                // sing-box spells the built-ins differently
                match name.as_str() {
                    "DIRECT" => "direct".to_string(),
                    "REJECT" => "block".to_string(),
                    other => other.to_string(),
                }
            }),
    );

    match group.kind {
        GroupKind::Meta => json!({
            "type": "selector",
            "tag": group.display_name,
            "outbounds": members,
        }),
        _ => json!({
            "type": "urltest",
            "tag": group.display_name,
            "outbounds": members,
            "url": DEFAULT_TEST_URL,
            "interval": format!("{}s", DEFAULT_TEST_INTERVAL),
        }),
    }
}

/// Generate the sing-box config for the final node and group lists
pub fn generate(nodes: &[Node], groups: &[Group]) -> Result<String> {
    if nodes.is_empty() {
        return Err(Error::conversion("no nodes to emit into sing-box config"));
    }

    let mut outbounds: Vec<Value> = nodes.iter().map(outbound).collect();
    for group in groups.iter().filter(|group| !group.is_empty()) {
        outbounds.push(group_outbound(group));
    }
    outbounds.push(json!({"type": "direct", "tag": "direct"}));
    outbounds.push(json!({"type": "block", "tag": "block"}));

    let final_target = groups
        .iter()
        .find(|group| group.kind == GroupKind::Meta)
        .map(|group| group.display_name.clone())
        .unwrap_or_else(|| "direct".to_string());

    let config = json!({
        "log": { "level": "info" },
        "inbounds": [{
            "type": "mixed",
            "tag": "mixed-in",
            "listen": "127.0.0.1",
            "listen_port": 7890,
        }],
        "outbounds": outbounds,
        "route": { "final": final_target },
    });

    serde_json::to_string_pretty(&config)
        .map_err(|e| Error::conversion(format!("sing-box config: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify;
    use crate::group::Grouper;

    #[test]
    fn test_generate_outbounds() {
        let mut trojan = Node::new(Protocol::Trojan, "t.example", 443).with_name("🇭🇰 T 01");
        trojan.settings.password = Some("pw".to_string());
        let mut nodes = vec![trojan];
        for node in &mut nodes {
            classify::classify(node);
        }
        let groups = Grouper::new(Vec::new()).build(&nodes);

        let out = generate(&nodes, &groups).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&out).unwrap();
        let outbounds = doc["outbounds"].as_array().unwrap();

        let trojan_out = &outbounds[0];
        assert_eq!(trojan_out["type"], "trojan");
        assert_eq!(trojan_out["server_port"], 443);
        assert_eq!(trojan_out["tls"]["enabled"], true);

        // Regional group renders as urltest
        let urltest = outbounds
            .iter()
            .find(|o| o["type"] == "urltest")
            .unwrap();
        assert_eq!(urltest["url"], DEFAULT_TEST_URL);
    }

    #[test]
    fn test_empty_is_conversion_error() {
        assert!(generate(&[], &[]).is_err());
    }
}
