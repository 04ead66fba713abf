//! Canonical node model
//!
//! Every advertised proxy endpoint, whatever wire format it arrived in,
//! is normalized into a [`Node`]. Nodes are rebuilt on every sync run;
//! only the display name is rewritten after classification.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Known proxy protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Vmess,
    Vless,
    Shadowsocks,
    Shadowsocksr,
    Trojan,
    Hysteria2,
    Http,
    Https,
    Socks5,
}

impl Protocol {
    /// Wire name as used in URIs and persisted snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Vmess => "vmess",
            Protocol::Vless => "vless",
            Protocol::Shadowsocks => "shadowsocks",
            Protocol::Shadowsocksr => "shadowsocksr",
            Protocol::Trojan => "trojan",
            Protocol::Hysteria2 => "hysteria2",
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Socks5 => "socks5",
        }
    }

    /// Human-readable label used by the classifier and namer
    pub fn label(&self) -> &'static str {
        match self {
            Protocol::Vmess => "VMess",
            Protocol::Vless => "VLESS",
            Protocol::Shadowsocks => "SS",
            Protocol::Shadowsocksr => "SSR",
            Protocol::Trojan => "Trojan",
            Protocol::Hysteria2 => "Hysteria2",
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Socks5 => "SOCKS5",
        }
    }

    /// URI scheme emitted for this protocol
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Shadowsocks => "ss",
            Protocol::Shadowsocksr => "ssr",
            other => other.as_str(),
        }
    }

    /// Parse a scheme or alias into a protocol
    pub fn from_scheme(scheme: &str) -> Option<Protocol> {
        match scheme.to_lowercase().as_str() {
            "vmess" => Some(Protocol::Vmess),
            "vless" => Some(Protocol::Vless),
            "ss" | "shadowsocks" => Some(Protocol::Shadowsocks),
            "ssr" | "shadowsocksr" => Some(Protocol::Shadowsocksr),
            "trojan" => Some(Protocol::Trojan),
            "hysteria2" | "hy2" => Some(Protocol::Hysteria2),
            "http" => Some(Protocol::Http),
            "https" => Some(Protocol::Https),
            "socks5" | "socks" | "socks5h" => Some(Protocol::Socks5),
            _ => None,
        }
    }

    /// All URI scheme prefixes recognised by the format detector
    pub fn known_prefixes() -> &'static [&'static str] {
        &[
            "vmess://",
            "vless://",
            "ss://",
            "ssr://",
            "trojan://",
            "hysteria2://",
            "hy2://",
            "http://",
            "https://",
            "socks5://",
            "socks://",
        ]
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Protocol-discriminated connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProxySettings {
    /// VMess/VLESS user id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// VMess alter id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alter_id: Option<u16>,
    /// Shadowsocks cipher / SSR method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Password or pre-shared auth string
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// HTTP/SOCKS5 username
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Transport layer (tcp, ws, grpc, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    /// TLS enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,
    /// TLS SNI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
    /// Skip certificate verification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_cert_verify: Option<bool>,
    /// WebSocket path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_path: Option<String>,
    /// WebSocket Host header
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_host: Option<String>,
    /// VLESS security (none, tls, reality)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security: Option<String>,
    /// VLESS encryption
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<String>,
    /// VLESS flow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    /// TLS client fingerprint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// ALPN list, comma separated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpn: Option<String>,
    /// SSR protocol
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssr_protocol: Option<String>,
    /// SSR protocol param
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssr_protocol_param: Option<String>,
    /// SSR obfs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obfs: Option<String>,
    /// SSR obfs param / hysteria2 obfs password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub obfs_param: Option<String>,
    /// Hysteria2 up speed hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub up: Option<String>,
    /// Hysteria2 down speed hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub down: Option<String>,
}

/// Geolocation resolved for a node's server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoInfo {
    /// ISO 3166-1 alpha-2 code, `None` when unresolved
    #[serde(rename = "countryCode")]
    pub country_code: Option<String>,
    /// Country name, "Others" when unresolved
    #[serde(rename = "countryName")]
    pub country_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asn: Option<String>,
    #[serde(rename = "resolvedAt")]
    pub resolved_at: DateTime<Utc>,
}

impl GeoInfo {
    /// Sentinel for hosts that could not be resolved
    pub fn others() -> Self {
        GeoInfo {
            country_code: None,
            country_name: "Others".to_string(),
            city: None,
            org: None,
            asn: None,
            resolved_at: Utc::now(),
        }
    }
}

/// Probe outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    Up,
    Down,
}

/// Result of the most recent reachability probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeInfo {
    pub status: ProbeStatus,
    #[serde(rename = "latencyMs", skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "probedAt")]
    pub probed_at: DateTime<Utc>,
}

/// Deduplication key: (server, port, protocol)
pub type FingerprintKey = (String, u16, Protocol);

/// Canonical proxy node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub protocol: Protocol,
    #[serde(rename = "displayName")]
    pub display_name: String,
    pub server: String,
    pub port: u16,
    #[serde(default)]
    pub settings: ProxySettings,
    /// Name of the subscription source this node came from
    #[serde(rename = "sourceTag", default)]
    pub source_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeInfo>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Original advertisement URI, kept for faithful re-emission
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
    /// Display name before the namer rewrote it
    #[serde(rename = "rawDisplayName", skip_serializing_if = "Option::is_none")]
    pub raw_display_name: Option<String>,
}

impl Node {
    /// Build a node with the derived id and defaulted display name
    pub fn new(protocol: Protocol, server: impl Into<String>, port: u16) -> Self {
        let server = server.into();
        Node {
            id: format!("{}-{}-{}", protocol.as_str(), server, port),
            protocol,
            display_name: format!("{} {}:{}", protocol.label(), server, port),
            server,
            port,
            settings: ProxySettings::default(),
            source_tag: String::new(),
            geo: None,
            probe: None,
            tags: Vec::new(),
            raw: None,
            raw_display_name: None,
        }
    }

    /// Set the display name, falling back to the default for empty remarks
    pub fn with_name(mut self, name: &str) -> Self {
        if !name.trim().is_empty() {
            self.display_name = name.trim().to_string();
        }
        self
    }

    /// Enforce the parse-time invariant: non-empty server, non-zero port
    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(Error::validation(format!(
                "node `{}` has empty server",
                self.display_name
            )));
        }
        if self.port == 0 {
            return Err(Error::validation(format!(
                "node `{}` has port 0",
                self.display_name
            )));
        }
        Ok(())
    }

    /// Deduplication key
    pub fn fingerprint(&self) -> FingerprintKey {
        (self.server.clone(), self.port, self.protocol)
    }

    /// Latency from the last probe, if the node was up
    pub fn latency_ms(&self) -> Option<u64> {
        self.probe.as_ref().and_then(|p| p.latency_ms)
    }

    /// Whether the last probe reported the node reachable
    pub fn is_up(&self) -> bool {
        matches!(
            self.probe.as_ref().map(|p| p.status),
            Some(ProbeStatus::Up)
        )
    }

    /// Country code resolved by classification or geolocation
    pub fn country_code(&self) -> Option<&str> {
        self.geo.as_ref().and_then(|g| g.country_code.as_deref())
    }
}
