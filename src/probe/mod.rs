//! Connectivity and latency probing
//!
//! A fixed-size worker pool drains the node list and measures one probe
//! per node. The probe shape depends on the protocol: full TLS handshake
//! for trojan, an HTTP fetch through the proxy for http/socks5, and a
//! bare TCP dial for everything else. Probes that succeed too slowly are
//! demoted to down.

use crate::classify::match_country;
use crate::common::node::{GeoInfo, Node, ProbeInfo, ProbeStatus, Protocol};
use crate::config::ProbeConfig;
use crate::geo::IpLocator;
use crate::{Error, Result};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tracing::debug;

/// Per-node probe result
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub node: Node,
    pub status: ProbeStatus,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub location_mismatch: bool,
    pub actual_geo: Option<GeoInfo>,
}

/// Bounded-concurrency prober
pub struct Prober {
    config: ProbeConfig,
    locator: Option<Arc<IpLocator>>,
}

impl Prober {
    pub fn new(config: ProbeConfig) -> Self {
        Prober {
            config,
            locator: None,
        }
    }

    /// Attach the locator used for location verification
    pub fn with_locator(mut self, locator: Arc<IpLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Probe every node; one outcome per input node, order not guaranteed
    pub async fn probe_all(&self, nodes: Vec<Node>) -> Vec<ProbeOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        stream::iter(nodes)
            .map(|node| {
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("probe semaphore closed");
                    self.probe_one(node).await
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await
    }

    /// Probe a single node and stamp its `probe` field
    pub async fn probe_one(&self, mut node: Node) -> ProbeOutcome {
        let started = Instant::now();
        let result = self.dispatch(&node).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (status, latency_ms, error) = match result {
            Ok(()) if elapsed_ms >= self.config.high_latency_floor_ms => (
                ProbeStatus::Down,
                Some(elapsed_ms),
                Some("latency too high".to_string()),
            ),
            Ok(()) => (ProbeStatus::Up, Some(elapsed_ms), None),
            Err(e) => (ProbeStatus::Down, None, Some(e.to_string())),
        };

        let (location_mismatch, actual_geo) = if self.config.verify_location
            && status == ProbeStatus::Up
        {
            self.verify_location(&node).await
        } else {
            (false, None)
        };

        node.probe = Some(ProbeInfo {
            status,
            latency_ms,
            error: error.clone(),
            probed_at: chrono::Utc::now(),
        });

        debug!(
            "probe {} {}:{} -> {:?} ({:?} ms)",
            node.protocol, node.server, node.port, status, latency_ms
        );

        ProbeOutcome {
            node,
            status,
            latency_ms,
            error,
            location_mismatch,
            actual_geo,
        }
    }

    async fn dispatch(&self, node: &Node) -> Result<()> {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        match node.protocol {
            Protocol::Http | Protocol::Https | Protocol::Socks5 => {
                self.probe_via_proxy(node, timeout).await
            }
            Protocol::Trojan => self.probe_tls(node, timeout).await,
            // Plain shadowsocks endpoints often sit behind slow links;
            // give the bare dial twice the timeout
            Protocol::Shadowsocks | Protocol::Shadowsocksr => {
                self.probe_tcp(node, timeout * 2).await
            }
            Protocol::Vmess | Protocol::Vless | Protocol::Hysteria2 => {
                self.probe_tcp(node, timeout).await
            }
        }
    }

    /// Bare TCP dial to server:port
    async fn probe_tcp(&self, node: &Node, timeout: Duration) -> Result<()> {
        let address = format!("{}:{}", node.server, node.port);
        tokio::time::timeout(timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| Error::timeout(format!("tcp dial to {} timed out", address)))?
            .map_err(|e| Error::probe(format!("tcp dial to {} failed: {}", address, e)))?;
        Ok(())
    }

    /// Fetch the test URL through the node as an upstream proxy
    async fn probe_via_proxy(&self, node: &Node, timeout: Duration) -> Result<()> {
        let auth = match (&node.settings.username, &node.settings.password) {
            (Some(user), Some(pass)) => format!(
                "{}:{}@",
                urlencoding::encode(user),
                urlencoding::encode(pass)
            ),
            (Some(user), None) => format!("{}@", urlencoding::encode(user)),
            _ => String::new(),
        };
        let proxy_url = format!(
            "{}://{}{}:{}",
            node.protocol.scheme(),
            auth,
            node.server,
            node.port
        );

        let proxy = reqwest::Proxy::all(&proxy_url)
            .map_err(|e| Error::probe(format!("invalid proxy url {}: {}", proxy_url, e)))?;
        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| Error::probe(e.to_string()))?;

        let response = client
            .get(&self.config.test_url)
            .send()
            .await
            .map_err(|e| Error::probe(format!("proxied fetch failed: {}", e)))?;
        let status = response.status();
        if status.is_success() || status.is_redirection() {
            Ok(())
        } else {
            Err(Error::probe(format!("proxied fetch returned HTTP {}", status.as_u16())))
        }
    }

    /// TLS handshake with SNI and certificate verification disabled
    async fn probe_tls(&self, node: &Node, timeout: Duration) -> Result<()> {
        let address = format!("{}:{}", node.server, node.port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| Error::timeout(format!("tcp dial to {} timed out", address)))?
            .map_err(|e| Error::probe(format!("tcp dial to {} failed: {}", address, e)))?;

        let sni = node
            .settings
            .sni
            .clone()
            .unwrap_or_else(|| node.server.clone());
        let server_name = rustls::pki_types::ServerName::try_from(sni)
            .map_err(|e| Error::probe(format!("invalid SNI: {}", e)))?;

        let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
        let config = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::probe(format!("tls config: {}", e)))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(tls::NoVerify::new()))
            .with_no_client_auth();
        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));

        tokio::time::timeout(timeout, connector.connect(server_name, stream))
            .await
            .map_err(|_| Error::timeout(format!("tls handshake with {} timed out", address)))?
            .map_err(|e| Error::probe(format!("tls handshake with {} failed: {}", address, e)))?;
        Ok(())
    }

    /// Compare the probe-resolved country against the name-derived hint
    async fn verify_location(&self, node: &Node) -> (bool, Option<GeoInfo>) {
        let locator = match &self.locator {
            Some(locator) => locator,
            None => return (false, None),
        };
        let entry = match locator.locate(&node.server).await {
            Ok(entry) => entry,
            Err(e) => {
                debug!("location verify for {} failed: {}", node.server, e);
                return (false, None);
            }
        };

        let hint = match_country(&node.display_name).map(|country| country.code);
        let mismatch = match (hint, entry.geo.country_code.as_deref()) {
            (Some(hint), Some(actual)) => hint != actual,
            _ => false,
        };
        (mismatch, Some(entry.geo))
    }
}

mod tls {
    //! Certificate verifier that accepts everything; probes only care
    //! whether a handshake completes, not who signed the cert.

    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{DigitallySignedStruct, SignatureScheme};

    #[derive(Debug)]
    pub struct NoVerify {
        provider: CryptoProvider,
    }

    impl NoVerify {
        pub fn new() -> Self {
            NoVerify {
                provider: rustls::crypto::aws_lc_rs::default_provider(),
            }
        }
    }

    impl ServerCertVerifier for NoVerify {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(
                message,
                cert,
                dss,
                &self.provider.signature_verification_algorithms,
            )
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            self.provider
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn prober(config: ProbeConfig) -> Prober {
        Prober::new(config)
    }

    fn fast_config() -> ProbeConfig {
        ProbeConfig {
            concurrency: 4,
            timeout_secs: 1,
            high_latency_floor_ms: 1000,
            verify_location: false,
            test_url: "http://www.gstatic.com/generate_204".to_string(),
        }
    }

    #[tokio::test]
    async fn test_tcp_probe_up() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Keep the listener alive for the duration of the probe
        let _guard = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let node = Node::new(Protocol::Vmess, "127.0.0.1", port);
        let outcome = prober(fast_config()).probe_one(node).await;
        assert_eq!(outcome.status, ProbeStatus::Up);
        assert!(outcome.latency_ms.unwrap() < 1000);
        assert!(outcome.node.is_up());
    }

    #[tokio::test]
    async fn test_tcp_probe_down() {
        // Port 1 on localhost is essentially never listening
        let node = Node::new(Protocol::Vmess, "127.0.0.1", 1);
        let outcome = prober(fast_config()).probe_one(node).await;
        assert_eq!(outcome.status, ProbeStatus::Down);
        assert!(outcome.error.is_some());
        assert_eq!(outcome.latency_ms, None);
    }

    #[tokio::test]
    async fn test_high_latency_demotion() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _guard = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let config = ProbeConfig {
            high_latency_floor_ms: 0, // every success is too slow
            ..fast_config()
        };
        let node = Node::new(Protocol::Vmess, "127.0.0.1", port);
        let outcome = prober(config).probe_one(node).await;
        assert_eq!(outcome.status, ProbeStatus::Down);
        assert_eq!(outcome.error.as_deref(), Some("latency too high"));
        assert!(outcome.latency_ms.is_some());
    }

    #[tokio::test]
    async fn test_http_probe_through_fake_proxy() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // A proxy that answers 204 to whatever request it receives
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _guard = tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buffer = vec![0u8; 4096];
                    let mut request = Vec::new();
                    loop {
                        let Ok(read) = stream.read(&mut buffer).await else {
                            return;
                        };
                        if read == 0 {
                            return;
                        }
                        request.extend_from_slice(&buffer[..read]);
                        if request.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let _ = stream
                        .write_all(b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n")
                        .await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        let config = ProbeConfig {
            test_url: "http://upstream.example/generate_204".to_string(),
            ..fast_config()
        };
        let node = Node::new(Protocol::Http, "127.0.0.1", port);
        let outcome = prober(config).probe_one(node).await;
        assert_eq!(outcome.status, ProbeStatus::Up, "error: {:?}", outcome.error);
    }

    #[tokio::test]
    async fn test_location_mismatch_against_name_hint() {
        use crate::geo::{GeoCacheEntry, IpLocator};
        use crate::config::LocateConfig;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _guard = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        // The locator "knows" this address is in Japan
        let dir = tempfile::tempdir().unwrap();
        let locator = IpLocator::new(&LocateConfig::default(), dir.path());
        locator.seed(GeoCacheEntry {
            ip: "127.0.0.1".to_string(),
            geo: GeoInfo {
                country_code: Some("JP".to_string()),
                country_name: "Japan".to_string(),
                city: None,
                org: None,
                asn: None,
                resolved_at: chrono::Utc::now(),
            },
            expires_at: chrono::Utc::now() + chrono::Duration::days(1),
        });

        let config = ProbeConfig {
            verify_location: true,
            ..fast_config()
        };
        let prober = Prober::new(config).with_locator(Arc::new(locator));

        // The name claims US; the resolved country disagrees
        let node = Node::new(Protocol::Vmess, "127.0.0.1", port).with_name("🇺🇸 US 01");
        let outcome = prober.probe_one(node).await;
        assert_eq!(outcome.status, ProbeStatus::Up);
        assert!(outcome.location_mismatch);
        assert_eq!(
            outcome.actual_geo.as_ref().and_then(|g| g.country_code.as_deref()),
            Some("JP")
        );
    }

    #[tokio::test]
    async fn test_probe_all_one_outcome_per_node() {
        let nodes = vec![
            Node::new(Protocol::Vmess, "127.0.0.1", 1),
            Node::new(Protocol::Shadowsocks, "127.0.0.1", 1),
            Node::new(Protocol::Vless, "127.0.0.1", 1),
        ];
        let outcomes = prober(fast_config()).probe_all(nodes).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|o| o.status == ProbeStatus::Down));
    }
}
