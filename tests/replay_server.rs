//! Replay server behaviour against a seeded corpus.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use traffic_replay::http::ReplayServer;
use traffic_replay::lifecycle::{SessionEnd, SessionMode};
use traffic_replay::report::junit::{MSG_NO_MATCH, MSG_UNREACHED};

mod common;
use common::*;

const APP: &str = "device";

fn recorded(method: &str, path: &str, headers: Value, body: Value) -> Value {
    json!({
        "request": {"method": method, "path": path, "headers": {}},
        "response": {
            "status_code": 200,
            "reason_phrase": "OK",
            "headers": headers,
            "body": body,
        }
    })
}

fn text(path: &str, body: &str) -> Value {
    recorded("GET", path, json!({"content-type": "text/plain"}), json!(body))
}

/// Compare request method and path only, so verdicts do not depend on the
/// client's headers or ephemeral port.
fn key_schema() -> Value {
    json!({"request": {"method": true, "path": true}, "response": true})
}

#[tokio::test]
async fn test_binary_body_served_as_original_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    seed_corpus(
        &config,
        APP,
        &[recorded(
            "GET",
            "/logo.png",
            json!({"content-type": "image/png", "content-length": "8"}),
            json!({"encoding": "base64", "data": "iVBORw0KGgo="}),
        )],
    );

    let server = start_replay_server(config, APP).await;
    let response = http_client()
        .get(format!("http://{}/logo.png", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "image/png");
    assert_eq!(
        response.bytes().await.unwrap().as_ref(),
        &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a]
    );

    let summary = server.handle.await.unwrap();
    assert_eq!(summary.mode, SessionMode::Replay);
    assert_eq!(summary.end, SessionEnd::Exhausted);
}

#[tokio::test]
async fn test_joined_cookies_served_as_separate_headers() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    seed_corpus(
        &config,
        APP,
        &[recorded(
            "POST",
            "/login",
            json!({"set-cookie": "a=1; HttpOnly§ b=2; Max-Age=60"}),
            json!("ok"),
        )],
    );

    let server = start_replay_server(config, APP).await;
    let response = http_client()
        .post(format!("http://{}/login", server.addr))
        .body("user=admin")
        .send()
        .await
        .unwrap();
    let cookies: Vec<&str> = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap())
        .collect();
    assert_eq!(cookies, vec!["a=1; HttpOnly", "b=2; Max-Age=60"]);
    assert_eq!(response.headers()["content-type"], "text/plain");
    server.handle.await.unwrap();
}

#[tokio::test]
async fn test_unknown_request_gets_404_and_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    write_schema(&config, APP, &key_schema());
    seed_corpus(&config, APP, &[text("/status", "Running")]);

    let server = start_replay_server(config.clone(), APP).await;
    let client = http_client();

    let response = client
        .get(format!("http://{}/missing", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND.as_u16());
    assert_eq!(
        response.json::<Value>().await.unwrap(),
        json!({"error": "No matching packet found"})
    );
    assert!(server.control.ended().is_none());

    let response = client
        .get(format!("http://{}/status", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "Running");

    let summary = server.handle.await.unwrap();
    assert_eq!((summary.passed, summary.failed, summary.unreached), (1, 1, 0));

    let report = std::fs::read_to_string(&config.report.path).unwrap();
    assert!(report.contains(r#"<testcase name="Alleged request 1">"#));
    assert!(report.contains(&format!(r#"<failure message="{MSG_NO_MATCH}">"#)));
    assert!(report.contains(r#"<testcase name="Request 1">"#));
}

#[tokio::test]
async fn test_interrupted_session_reports_unreached_entries() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    write_schema(&config, APP, &key_schema());
    seed_corpus(
        &config,
        APP,
        &[text("/a", "first"), text("/b", "second"), text("/c", "third")],
    );

    let server = start_replay_server(config.clone(), APP).await;
    let client = http_client();
    for path in ["/a", "/b"] {
        let response = client
            .get(format!("http://{}{path}", server.addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    server.control.finish(SessionEnd::Interrupted);
    let summary = server.handle.await.unwrap();
    assert_eq!(summary.end, SessionEnd::Interrupted);
    assert_eq!((summary.passed, summary.failed, summary.unreached), (2, 0, 1));

    let report = std::fs::read_to_string(&config.report.path).unwrap();
    assert!(report.contains(r#"tests="3" failures="1""#));
    assert!(report.contains(r#"<testcase name="Request 3">"#));
    assert!(report.contains(&format!(r#"<failure message="{MSG_UNREACHED}">"#)));
    assert!(report.contains("<path>/c</path>"));
}

#[tokio::test]
async fn test_concurrent_identical_requests_consume_entry_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    seed_corpus(&config, APP, &[text("/item", "only once"), text("/done", "bye")]);

    let server = start_replay_server(config, APP).await;
    let client = http_client();

    let requests = (0..8).map(|_| {
        let client = client.clone();
        let url = format!("http://{}/item", server.addr);
        tokio::spawn(async move { client.get(url).send().await.unwrap().status().as_u16() })
    });
    let mut statuses = Vec::new();
    for request in requests.collect::<Vec<_>>() {
        statuses.push(request.await.unwrap());
    }
    assert_eq!(statuses.iter().filter(|&&s| s == 200).count(), 1);
    assert_eq!(statuses.iter().filter(|&&s| s == 404).count(), 7);

    client
        .get(format!("http://{}/done", server.addr))
        .send()
        .await
        .unwrap();
    let summary = server.handle.await.unwrap();
    assert_eq!(summary.end, SessionEnd::Exhausted);
}

#[tokio::test]
async fn test_router_oneshot() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    seed_corpus(&config, APP, &[text("/status?verbose=1", "Running")]);

    let server = ReplayServer::new(config, APP).unwrap();
    let local: SocketAddr = "127.0.0.1:8080".parse().unwrap();
    let peer: SocketAddr = "127.0.0.1:50000".parse().unwrap();

    let mut request = Request::get("/status?verbose=1").body(Body::empty()).unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));
    let response = server.router(local).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"Running");
    assert_eq!(server.control().ended(), Some(SessionEnd::Exhausted));
}

#[tokio::test]
async fn test_missing_corpus_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    assert!(matches!(
        ReplayServer::new(config, APP),
        Err(traffic_replay::EngineError::CorpusMissing(app)) if app == APP
    ));
}
