//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use etherparse::PacketBuilder;
use serde_json::Value;
use tokio::net::TcpListener;

use traffic_replay::capture::RawPacket;
use traffic_replay::config::EngineConfig;
use traffic_replay::http::ReplayServer;
use traffic_replay::lifecycle::{SessionControl, SessionSummary};
use traffic_replay::storage::CorpusStore;

pub const CLIENT: (Ipv4Addr, u16) = (Ipv4Addr::new(10, 0, 2, 15), 50000);
pub const SERVER: (Ipv4Addr, u16) = (Ipv4Addr::new(93, 184, 216, 34), 80);

/// Configuration rooted in a temporary directory.
pub fn test_config(dir: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.storage.corpus_dir = dir.join("corpus");
    config.storage.schema_dir = dir.join("schema");
    config.report.path = dir.join("junit_report.xml");
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config
}

/// Write `<schema_dir>/<app>.json`.
pub fn write_schema(config: &EngineConfig, app: &str, schema: &Value) {
    std::fs::create_dir_all(&config.storage.schema_dir).unwrap();
    std::fs::write(
        config.storage.schema_dir.join(format!("{app}.json")),
        serde_json::to_vec_pretty(schema).unwrap(),
    )
    .unwrap();
}

/// Store exchange documents as an existing corpus.
pub fn seed_corpus(config: &EngineConfig, app: &str, exchanges: &[Value]) {
    let store = CorpusStore::new(&config.storage.corpus_dir);
    store.create(app).unwrap();
    for exchange in exchanges {
        store.save(app, exchange, &[]).unwrap();
    }
}

/// One Ethernet/IPv4/TCP frame built with etherparse.
pub fn frame(src: (Ipv4Addr, u16), dst: (Ipv4Addr, u16), seq: u32, payload: &[u8], fin: bool) -> RawPacket {
    let mut tcp = PacketBuilder::ethernet2([2, 0, 0, 0, 0, 1], [2, 0, 0, 0, 0, 2])
        .ipv4(src.0.octets(), dst.0.octets(), 64)
        .tcp(src.1, dst.1, seq, 65535)
        .ack(1)
        .psh();
    if fin {
        tcp = tcp.fin();
    }
    let mut data = Vec::with_capacity(tcp.size(payload.len()));
    tcp.write(&mut data, payload).unwrap();
    RawPacket::ethernet(Duration::from_secs(1_700_000_000), data)
}

/// Request frame followed by response frame on one client connection.
pub fn exchange_frames(client_port: u16, request: &[u8], response: &[u8]) -> Vec<RawPacket> {
    let client = (CLIENT.0, client_port);
    vec![
        frame(client, SERVER, 1, request, false),
        frame(SERVER, client, 1, response, false),
    ]
}

pub fn text_response(status: &str, content_type: &str, body: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

/// Replay server running on an ephemeral port.
pub struct RunningServer {
    pub addr: SocketAddr,
    pub control: SessionControl,
    pub handle: tokio::task::JoinHandle<SessionSummary>,
}

pub async fn start_replay_server(config: EngineConfig, app: &str) -> RunningServer {
    let server = ReplayServer::new(config, app).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let control = server.control();
    let handle = tokio::spawn(async move { server.run(listener).await.unwrap() });
    RunningServer { addr, control, handle }
}

/// Client without connection pooling, so shutdown is never held open.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}
