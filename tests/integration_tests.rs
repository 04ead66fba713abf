//! End-to-end tests for the sync pipeline
//!
//! Each test drives real components against local listeners or inline
//! payloads; nothing here talks to the public internet.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use subhub_rust::classify::{self, Namer};
use subhub_rust::common::encoding;
use subhub_rust::config::FetchConfig;
use subhub_rust::dedup::{dedup, DedupOptions};
use subhub_rust::emit::uri_line;
use subhub_rust::fetch::Fetcher;
use subhub_rust::parser;
use subhub_rust::{Node, Protocol};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A base64 envelope holding a vmess and an ss node at the same
/// server:port. The dedup key includes the protocol, so both survive.
#[test]
fn base64_envelope_same_endpoint_different_protocols() {
    let vmess = r#"{"v":"2","ps":"A","add":"1.1.1.1","port":"443","id":"abc","aid":"0","net":"tcp","tls":"tls"}"#;
    let inner = format!(
        "vmess://{}\nss://YWVzLTI1Ni1nY206cGFzcw==@1.1.1.1:443#A",
        encoding::encode(vmess)
    );
    let envelope = encoding::encode(&inner);

    let nodes = parser::parse_subscription(&envelope, "env").unwrap();
    assert_eq!(nodes.len(), 2);

    let deduped = dedup(nodes, &DedupOptions::default());
    assert_eq!(deduped.len(), 2, "protocols differ, both must survive");
    assert_eq!(deduped[0].protocol, Protocol::Vmess);
    assert_eq!(deduped[1].protocol, Protocol::Shadowsocks);
    assert_eq!(deduped[0].server, deduped[1].server);
    assert_eq!(deduped[0].port, deduped[1].port);
}

/// A trojan URL whose password contains `@` and a percent escape
#[test]
fn trojan_url_with_special_chars() {
    let node = parser::decode_uri("trojan://p@ss%21@host.example:443?sni=h.example#My%20Node")
        .unwrap();
    assert_eq!(node.protocol, Protocol::Trojan);
    assert_eq!(node.server, "host.example");
    assert_eq!(node.port, 443);
    assert_eq!(node.settings.password.as_deref(), Some("p@ss!"));
    assert_eq!(node.settings.sni.as_deref(), Some("h.example"));
    assert_eq!(node.display_name, "My Node");
}

/// Clash YAML without a top-level `proxies:` but with an inline proxy
/// list inside `proxy-providers:`
#[test]
fn parser_falls_back_to_proxy_providers() {
    let yaml = r#"
proxy-providers:
  x:
    type: inline
    proxies:
      - name: "n"
        type: ss
        server: "s"
        port: 443
        cipher: aes-256-gcm
        password: "p"
"#;
    let nodes = parser::parse_subscription(yaml, "providers").unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].display_name, "n");
    assert_eq!(nodes[0].settings.method.as_deref(), Some("aes-256-gcm"));
    assert_eq!(nodes[0].source_tag, "providers");
}

/// Minimal HTTP/1.1 responder that 403s one user agent and serves a valid
/// base64 subscription body to every other
async fn spawn_ua_picky_server(reject_ua: &'static str) -> (u16, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            hits_clone.fetch_add(1, Ordering::SeqCst);

            let mut buffer = vec![0u8; 4096];
            let mut request = String::new();
            loop {
                let Ok(read) = stream.read(&mut buffer).await else {
                    break;
                };
                if read == 0 {
                    break;
                }
                request.push_str(&String::from_utf8_lossy(&buffer[..read]));
                if request.contains("\r\n\r\n") {
                    break;
                }
            }

            let rejected = request
                .lines()
                .any(|line| line.to_lowercase().starts_with("user-agent:") && line.contains(reject_ua));
            let response = if rejected {
                "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    .to_string()
            } else {
                let body = encoding::encode("trojan://pw@a.example:443#A\ntrojan://pw@b.example:443#B");
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                )
            };
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (port, hits)
}

/// The fetcher rotates to the second user agent after the first one is
/// rejected, without exceeding maxRetries * uaCount requests
#[tokio::test]
async fn fetcher_rotates_user_agents() {
    let (port, hits) = spawn_ua_picky_server("ua-one").await;

    let config = FetchConfig {
        max_retries: 2,
        timeout_secs: 2,
        egress_fallback_threshold: 99,
        backoff_base_ms: 1,
        rate_limit_sleep_ms: 1,
        user_agents: vec!["ua-one".to_string(), "ua-two".to_string()],
    };
    let fetcher = Fetcher::new(config);
    let response = fetcher
        .fetch(&format!("http://127.0.0.1:{}/sub", port), false)
        .await
        .expect("second UA must succeed");

    let nodes = parser::parse_subscription(&response.body, "picky").unwrap();
    assert_eq!(nodes.len(), 2);
    assert!(hits.load(Ordering::SeqCst) <= 4, "at most maxRetries * uaCount requests");
}

/// Three US nodes from three sources are renumbered by final list
/// position; the original numbering is ignored but preserved
#[test]
fn region_renumbering_ignores_source_numbers() {
    let mut nodes = vec![
        tagged(Node::new(Protocol::Trojan, "a.example", 443).with_name("US premium 7"), "s1"),
        tagged(Node::new(Protocol::Trojan, "b.example", 443).with_name("🇺🇸 fast-42"), "s2"),
        tagged(Node::new(Protocol::Trojan, "c.example", 443).with_name("United States 99"), "s3"),
    ];
    for node in &mut nodes {
        classify::classify(node);
    }
    Namer::default().rename_all(&mut nodes);

    assert!(nodes[0].display_name.ends_with(" 01"), "{}", nodes[0].display_name);
    assert!(nodes[1].display_name.ends_with(" 02"), "{}", nodes[1].display_name);
    assert!(nodes[2].display_name.ends_with(" 03"), "{}", nodes[2].display_name);
    assert_eq!(nodes[0].raw_display_name.as_deref(), Some("US premium 7"));
    assert_eq!(nodes[1].raw_display_name.as_deref(), Some("🇺🇸 fast-42"));
    for node in &nodes {
        assert!(node.display_name.starts_with("🇺🇸 US"), "{}", node.display_name);
    }
}

fn tagged(mut node: Node, tag: &str) -> Node {
    node.source_tag = tag.to_string();
    node
}

/// Sources marked as requiring a regional egress dial through the proxy
/// pool from the very first attempt
#[tokio::test]
async fn regional_egress_sources_dial_through_pool() {
    use subhub_rust::fetch::EgressProxyPool;

    // A "proxy" that counts connections and serves a valid subscription
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            hits_clone.fetch_add(1, Ordering::SeqCst);
            let mut buffer = vec![0u8; 4096];
            let mut request = String::new();
            loop {
                let Ok(read) = stream.read(&mut buffer).await else {
                    break;
                };
                if read == 0 {
                    break;
                }
                request.push_str(&String::from_utf8_lossy(&buffer[..read]));
                if request.contains("\r\n\r\n") {
                    break;
                }
            }
            let body = "trojan://pw@geo.example:443#geo";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let cache_path = dir.path().join("china_proxies.json");
    EgressProxyPool::store(&cache_path, &[format!("http://127.0.0.1:{}", port)]).unwrap();
    let pool = Arc::new(EgressProxyPool::load(&cache_path));

    let config = FetchConfig {
        max_retries: 1,
        timeout_secs: 2,
        // High threshold: only require_regional_egress can reach the pool
        egress_fallback_threshold: 99,
        backoff_base_ms: 1,
        rate_limit_sleep_ms: 1,
        user_agents: vec!["t".to_string()],
    };
    let fetcher = Fetcher::new(config).with_egress(pool);

    // The upstream host does not exist; only the proxy answers, so a
    // successful fetch proves the dial went through the pool
    let response = fetcher
        .fetch("http://upstream.invalid/sub", true)
        .await
        .expect("fetch through the egress proxy");
    assert!(response.body.contains("trojan://"));
    assert!(hits.load(Ordering::SeqCst) >= 1);
}

/// Universal invariant: a group file line is the original URI verbatim
/// whenever the node still carries one
#[test]
fn raw_uri_reemitted_verbatim() {
    let raw = "ss://YWVzLTI1Ni1nY206cGFzcw==@9.9.9.9:8388#Keep%20Me";
    let node = parser::decode_uri(raw).unwrap();
    assert_eq!(node.raw.as_deref(), Some(raw));
    assert_eq!(uri_line(&node), raw);
}

/// Universal invariant: parsed nodes always satisfy the node invariant
#[test]
fn parsed_nodes_satisfy_invariant() {
    let inner = [
        "trojan://pw@ok.example:443#fine",
        "trojan://pw@:443#empty-host",
        "trojan://pw@bad.example:0#zero-port",
        "ss://!!!@x:1#broken-base64",
    ]
    .join("\n");

    let nodes = parser::parse_subscription(&inner, "mixed").unwrap();
    assert_eq!(nodes.len(), 1);
    for node in &nodes {
        assert!(!node.server.is_empty());
        assert!(node.port >= 1);
    }
}

/// Dedup laws: subset, key uniqueness, idempotence
#[test]
fn dedup_laws() {
    let inner = format!(
        "{}\n{}\n{}",
        "trojan://pw@dup.example:443#one",
        "trojan://pw@dup.example:443#two",
        "ss://YWVzLTI1Ni1nY206cA==@dup.example:443#three"
    );
    let nodes = parser::parse_subscription(&inner, "dups").unwrap();
    let options = DedupOptions::default();

    let once = dedup(nodes.clone(), &options);
    assert!(once.len() < nodes.len());
    // Every survivor came from the input
    for survivor in &once {
        assert!(nodes.iter().any(|n| n.fingerprint() == survivor.fingerprint()));
    }
    // Pairwise distinct fingerprints
    for (i, a) in once.iter().enumerate() {
        for b in once.iter().skip(i + 1) {
            assert_ne!(a.fingerprint(), b.fingerprint());
        }
    }
    // Idempotent
    let twice = dedup(once.clone(), &options);
    assert_eq!(once, twice);
}
