//! End-to-end delivery tests against a real listener.
//!
//! Each test stands up the full engine (accept loop, worker pool,
//! schedulers, streaming dispatcher) on an ephemeral port, feeds the
//! caches through producer handles like an encoder pipeline would, and
//! talks plain HTTP over a TcpStream.

use ringcast::config::{Config, JobConfig, ServerConfig, StreamConfig};
use ringcast::server::EventServer;
use ringcast::state::{self, JobRegistry, StreamProducer};
use ringcast::streaming::StreamingDispatcher;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            workers: 4,
            max_sessions: 16,
        },
        jobs: vec![JobConfig {
            name: "demo".into(),
            playlists: true,
            streams: vec![
                StreamConfig {
                    name: "hd".into(),
                    bandwidth_kbps: 2500,
                },
                StreamConfig {
                    name: "sd".into(),
                    bandwidth_kbps: 800,
                },
            ],
        }],
        ..Config::default()
    }
}

async fn start_server() -> (
    EventServer<StreamingDispatcher>,
    SocketAddr,
    Arc<JobRegistry>,
    Vec<StreamProducer>,
) {
    let config = test_config();
    let (registry, producers) = state::build_registry(&config).unwrap();
    let server = EventServer::bind(
        &config.server,
        StreamingDispatcher::new(Arc::clone(&registry)),
    )
    .await
    .unwrap();
    let addr = server.local_addr();
    (server, addr, registry, producers)
}

/// Plain request/response exchange; the server closes static responses.
async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(format!("GET {path} HTTP/1.1\r\nHost: t\r\n\r\n").as_bytes())
        .await
        .unwrap();
    let mut response = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut response))
        .await
        .expect("response timed out")
        .unwrap();
    String::from_utf8_lossy(&response).into_owned()
}

/// Split a response into (status line + headers, body bytes).
fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let pos = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no header terminator");
    (
        String::from_utf8_lossy(&raw[..pos]).into_owned(),
        raw[pos + 4..].to_vec(),
    )
}

/// Decode as many complete chunked-transfer frames as `raw` holds.
fn decode_chunks(raw: &[u8]) -> Vec<u8> {
    let mut decoded = Vec::new();
    let mut pos = 0;
    loop {
        let line_end = match raw[pos..].windows(2).position(|w| w == b"\r\n") {
            Some(offset) => pos + offset,
            None => break,
        };
        let size_line = std::str::from_utf8(&raw[pos..line_end]).unwrap();
        let size = usize::from_str_radix(size_line, 16).unwrap();
        let payload_start = line_end + 2;
        if payload_start + size + 2 > raw.len() {
            break;
        }
        decoded.extend_from_slice(&raw[payload_start..payload_start + size]);
        pos = payload_start + size + 2;
    }
    decoded
}

// ---------------------------------------------------------------------------
// Progressive chunked playback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progressive_stream_delivers_gops_in_order() {
    let (server, addr, registry, mut producers) = start_server().await;
    let hd = &mut producers[0];

    // One open GOP before the client connects.
    let gop_a: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
    hd.push(&gop_a, 1_000_000, true).unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /demo/hd HTTP/1.1\r\nHost: t\r\n\r\n")
        .await
        .unwrap();

    // Header first.
    let mut raw = Vec::new();
    let mut scratch = [0u8; 4096];
    let header_end = loop {
        let n = timeout(Duration::from_secs(5), client.read(&mut scratch))
            .await
            .expect("header timed out")
            .unwrap();
        assert!(n > 0, "server closed during response header");
        raw.extend_from_slice(&scratch[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let header = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    assert!(header.starts_with("HTTP/1.1 200"), "header: {header}");
    assert!(header.contains("Transfer-Encoding: chunked"));
    assert!(header.contains("Content-Type: video/mpeg"));
    assert!(header.contains("Access-Control-Allow-Origin: *"));

    // Two more GOPs while the client is attached.
    let gop_b: Vec<u8> = (0..20000u32).map(|i| (i % 251) as u8).collect();
    let gop_c = vec![0xC5u8; 500];
    hd.push(&gop_b, 2_000_000, true).unwrap();
    hd.push(&gop_c, 3_000_000, true).unwrap();

    // The stream starts at the GOP that was open at connect time, so the
    // expected byte sequence is A then B then C, no gaps, no duplicates.
    let mut expected = gop_a.clone();
    expected.extend_from_slice(&gop_b);
    expected.extend_from_slice(&gop_c);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let body = decode_chunks(&raw[header_end..]);
        if body.len() >= expected.len() {
            assert_eq!(body, expected);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "only {} of {} bytes arrived",
            body.len(),
            expected.len()
        );
        let n = timeout(Duration::from_secs(5), client.read(&mut scratch))
            .await
            .expect("stream stalled")
            .unwrap();
        assert!(n > 0, "server closed a live stream");
        raw.extend_from_slice(&scratch[..n]);
    }

    // Client hangs up; the access count must fall back to zero.
    drop(client);
    let job = registry.get("demo").unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while job.active_access() != 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "access count stuck at {}",
            job.active_access()
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    server.shutdown().await;
}

#[tokio::test]
async fn progressive_stream_ends_on_job_restart() {
    let (server, addr, registry, mut producers) = start_server().await;
    producers[0].push(&[1u8; 100], 1, true).unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /demo/hd HTTP/1.1\r\nHost: t\r\n\r\n")
        .await
        .unwrap();

    // Wait for the header, then restart the job.
    let mut scratch = [0u8; 4096];
    let n = timeout(Duration::from_secs(5), client.read(&mut scratch))
        .await
        .unwrap()
        .unwrap();
    assert!(n > 0);
    registry.get("demo").unwrap().bump_age();

    // The server must close the connection on its own.
    let mut rest = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut rest))
        .await
        .expect("connection not closed after restart")
        .unwrap();

    server.shutdown().await;
}

// ---------------------------------------------------------------------------
// Segment fetch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn segment_fetch_returns_exact_payload() {
    let (server, addr, _registry, mut producers) = start_server().await;
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 233) as u8).collect();
    producers[0].push(&payload, 1_000_000, true).unwrap();
    producers[0].push(b"next", 2_000_000, true).unwrap();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /demo/hd/1000000.ts HTTP/1.1\r\nHost: t\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();

    let (header, body) = split_response(&raw);
    assert!(header.starts_with("HTTP/1.1 200"), "header: {header}");
    assert!(header.contains(&format!("Content-Length: {}", payload.len())));
    assert!(header.contains("Content-Type: video/mpeg"));
    assert_eq!(body, payload);

    server.shutdown().await;
}

#[tokio::test]
async fn open_or_missing_segment_is_404() {
    let (server, addr, _registry, mut producers) = start_server().await;
    producers[0].push(b"only", 1_000_000, true).unwrap();

    // Still open: not addressable.
    let response = http_get(addr, "/demo/hd/1000000.ts").await;
    assert!(response.starts_with("HTTP/1.1 404"));
    // Never produced.
    let response = http_get(addr, "/demo/hd/42.ts").await;
    assert!(response.starts_with("HTTP/1.1 404"));

    server.shutdown().await;
}

// ---------------------------------------------------------------------------
// Playlists
// ---------------------------------------------------------------------------

#[tokio::test]
async fn master_and_media_playlists() {
    let (server, addr, _registry, mut producers) = start_server().await;
    for ts in [1_000_000u64, 2_000_000, 3_000_000, 4_000_000] {
        producers[0].push(&[9u8; 64], ts, true).unwrap();
    }

    let master = http_get(addr, "/demo/playlist.m3u8").await;
    assert!(master.starts_with("HTTP/1.1 200"));
    assert!(master.contains("Content-Type: application/vnd.apple.mpegurl"));
    assert!(master.contains("hd/playlist.m3u8"));
    assert!(master.contains("sd/playlist.m3u8"));
    assert!(master.contains("BANDWIDTH=2500000"));

    let media = http_get(addr, "/demo/hd/playlist.m3u8").await;
    assert!(media.starts_with("HTTP/1.1 200"));
    assert!(media.contains("#EXTM3U"));
    // Three closed segments, EXTINF of one second each.
    assert!(media.contains("1000000.ts"));
    assert!(media.contains("3000000.ts"));
    assert!(media.contains("#EXTINF:1.00,"));

    // The sd stream has produced nothing: playlist not available yet.
    let empty = http_get(addr, "/demo/sd/playlist.m3u8").await;
    assert!(empty.starts_with("HTTP/1.1 404"));

    server.shutdown().await;
}

// ---------------------------------------------------------------------------
// Resolution failures and odds and ends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_targets_answer_404() {
    let (server, addr, _registry, mut producers) = start_server().await;
    producers[0].push(b"data", 1, true).unwrap();

    for path in [
        "/nosuchjob/hd",
        "/demo/uhd",
        "/demo/hd/playlist.m3u8/extra",
        "/nosuchjob/playlist.m3u8",
    ] {
        let response = http_get(addr, path).await;
        assert!(
            response.starts_with("HTTP/1.1 404"),
            "{path} answered: {}",
            response.lines().next().unwrap_or("")
        );
        assert!(response.contains("Connection: close"));
    }

    // A stream that exists but has produced nothing yet is also 404.
    let response = http_get(addr, "/demo/sd").await;
    assert!(response.starts_with("HTTP/1.1 404"));

    server.shutdown().await;
}

#[tokio::test]
async fn crossdomain_policy_is_served() {
    let (server, addr, _registry, _producers) = start_server().await;
    let response = http_get(addr, "/crossdomain.xml").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("Content-Type: text/xml"));
    assert!(response.contains("<allow-access-from domain=\"*\"/>"));
    server.shutdown().await;
}

#[tokio::test]
async fn malformed_request_answers_400() {
    let (server, addr, _registry, _producers) = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"NONSENSE \r\n\r\n").await.unwrap();
    let mut raw = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    assert!(String::from_utf8_lossy(&raw).starts_with("HTTP/1.1 400"));
    server.shutdown().await;
}
