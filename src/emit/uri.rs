//! Inverse URI encoders
//!
//! Synthesize a canonical advertisement URI from a node when the original
//! `raw` URI is unavailable. Security-bearing fields (server, port, auth
//! material) round-trip losslessly through the matching decoder.

use crate::common::encoding;
use crate::common::node::{Node, Protocol};
use serde_json::json;

/// Encode a node into its canonical URI form
pub fn encode_uri(node: &Node) -> String {
    match node.protocol {
        Protocol::Vmess => encode_vmess(node),
        Protocol::Vless => encode_vless(node),
        Protocol::Shadowsocks => encode_shadowsocks(node),
        Protocol::Shadowsocksr => encode_shadowsocksr(node),
        Protocol::Trojan => encode_trojan(node),
        Protocol::Hysteria2 => encode_hysteria2(node),
        Protocol::Http | Protocol::Https | Protocol::Socks5 => encode_plain(node),
    }
}

fn host_for_uri(server: &str) -> String {
    if server.contains(':') {
        format!("[{}]", server)
    } else {
        server.to_string()
    }
}

fn encode_vmess(node: &Node) -> String {
    let settings = &node.settings;
    let body = json!({
        "v": "2",
        "ps": node.display_name,
        "add": node.server,
        "port": node.port.to_string(),
        "id": settings.uuid.clone().unwrap_or_default(),
        "aid": settings.alter_id.unwrap_or(0).to_string(),
        "net": settings.transport.clone().unwrap_or_else(|| "tcp".to_string()),
        "type": "none",
        "host": settings.ws_host.clone().unwrap_or_default(),
        "path": settings.ws_path.clone().unwrap_or_default(),
        "tls": if settings.tls == Some(true) { "tls" } else { "none" },
        "sni": settings.sni.clone().unwrap_or_default(),
    });
    format!("vmess://{}", encoding::encode(body.to_string()))
}

fn encode_vless(node: &Node) -> String {
    let settings = &node.settings;
    let mut params: Vec<(&str, String)> = Vec::new();
    params.push((
        "type",
        settings.transport.clone().unwrap_or_else(|| "tcp".to_string()),
    ));
    params.push((
        "security",
        settings.security.clone().unwrap_or_else(|| "none".to_string()),
    ));
    if let Some(encryption) = &settings.encryption {
        params.push(("encryption", encryption.clone()));
    }
    if let Some(sni) = &settings.sni {
        params.push(("sni", sni.clone()));
    }
    if let Some(fp) = &settings.fingerprint {
        params.push(("fp", fp.clone()));
    }
    if let Some(alpn) = &settings.alpn {
        params.push(("alpn", alpn.clone()));
    }
    if let Some(path) = &settings.ws_path {
        params.push(("path", path.clone()));
    }
    if let Some(host) = &settings.ws_host {
        params.push(("host", host.clone()));
    }
    if let Some(flow) = &settings.flow {
        params.push(("flow", flow.clone()));
    }
    let query = params
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");

    format!(
        "vless://{}@{}:{}?{}#{}",
        settings.uuid.as_deref().unwrap_or_default(),
        host_for_uri(&node.server),
        node.port,
        query,
        urlencoding::encode(&node.display_name)
    )
}

fn encode_shadowsocks(node: &Node) -> String {
    let userinfo = encoding::encode(format!(
        "{}:{}",
        node.settings.method.as_deref().unwrap_or_default(),
        node.settings.password.as_deref().unwrap_or_default()
    ));
    format!(
        "ss://{}@{}:{}#{}",
        userinfo,
        host_for_uri(&node.server),
        node.port,
        urlencoding::encode(&node.display_name)
    )
}

fn encode_shadowsocksr(node: &Node) -> String {
    let settings = &node.settings;
    let mut body = format!(
        "{}:{}:{}:{}:{}:{}",
        node.server,
        node.port,
        settings.ssr_protocol.as_deref().unwrap_or("origin"),
        settings.method.as_deref().unwrap_or_default(),
        settings.obfs.as_deref().unwrap_or("plain"),
        encoding::encode(settings.password.as_deref().unwrap_or_default())
    );
    let mut params: Vec<String> = vec![format!(
        "remarks={}",
        encoding::encode(&node.display_name)
    )];
    if let Some(obfs_param) = &settings.obfs_param {
        params.push(format!("obfsparam={}", encoding::encode(obfs_param)));
    }
    if let Some(proto_param) = &settings.ssr_protocol_param {
        params.push(format!("protoparam={}", encoding::encode(proto_param)));
    }
    body.push_str("/?");
    body.push_str(&params.join("&"));
    format!("ssr://{}", encoding::encode(&body))
}

fn encode_trojan(node: &Node) -> String {
    let settings = &node.settings;
    let mut params: Vec<String> = Vec::new();
    if let Some(sni) = &settings.sni {
        params.push(format!("sni={}", urlencoding::encode(sni)));
    }
    if settings.skip_cert_verify == Some(true) {
        params.push("allowInsecure=1".to_string());
    }
    let query = if params.is_empty() {
        String::new()
    } else {
        format!("?{}", params.join("&"))
    };
    format!(
        "trojan://{}@{}:{}{}#{}",
        urlencoding::encode(settings.password.as_deref().unwrap_or_default()),
        host_for_uri(&node.server),
        node.port,
        query,
        urlencoding::encode(&node.display_name)
    )
}

fn encode_hysteria2(node: &Node) -> String {
    let settings = &node.settings;
    let mut params: Vec<String> = Vec::new();
    if let Some(sni) = &settings.sni {
        params.push(format!("sni={}", urlencoding::encode(sni)));
    }
    if settings.skip_cert_verify == Some(true) {
        params.push("insecure=1".to_string());
    }
    if let Some(obfs) = &settings.obfs {
        params.push(format!("obfs={}", urlencoding::encode(obfs)));
    }
    if let Some(obfs_password) = &settings.obfs_param {
        params.push(format!("obfs-password={}", urlencoding::encode(obfs_password)));
    }
    if let Some(up) = &settings.up {
        params.push(format!("up={}", urlencoding::encode(up)));
    }
    if let Some(down) = &settings.down {
        params.push(format!("down={}", urlencoding::encode(down)));
    }
    let query = if params.is_empty() {
        String::new()
    } else {
        format!("?{}", params.join("&"))
    };
    format!(
        "hysteria2://{}@{}:{}{}#{}",
        urlencoding::encode(settings.password.as_deref().unwrap_or_default()),
        host_for_uri(&node.server),
        node.port,
        query,
        urlencoding::encode(&node.display_name)
    )
}

fn encode_plain(node: &Node) -> String {
    let settings = &node.settings;
    let userinfo = match (&settings.username, &settings.password) {
        (Some(user), Some(pass)) => format!(
            "{}:{}@",
            urlencoding::encode(user),
            urlencoding::encode(pass)
        ),
        (Some(user), None) => format!("{}@", urlencoding::encode(user)),
        _ => String::new(),
    };
    format!(
        "{}://{}{}:{}#{}",
        node.protocol.scheme(),
        userinfo,
        host_for_uri(&node.server),
        node.port,
        urlencoding::encode(&node.display_name)
    )
}
