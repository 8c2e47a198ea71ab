//! Integration tests for the HTTP health endpoint.
//!
//! Validates that `GET /health` returns `200 OK` with a JSON status body and
//! that the server stops when its cancellation token fires. Uses an
//! ephemeral port to avoid conflicts with running instances.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use specwright::transport::ws::{serve, HealthStatus};
use specwright::Result;

use super::test_helpers::{test_config, test_state, ScriptedAgent};

/// Spawn the server on an ephemeral port, returning its base URL.
///
/// Caller must cancel `ct` to shut the server down.
async fn spawn_server(
    task_dir: &std::path::Path,
) -> (String, CancellationToken, JoinHandle<Result<()>>) {
    // Discover a free port, then let `serve` bind it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);

    let mut config = test_config(task_dir, "");
    config.http_port = port;
    let state = test_state(config, Arc::new(ScriptedAgent::new()));

    let ct = CancellationToken::new();
    let handle = tokio::spawn(serve(state, ct.clone()));

    // Give the server a moment to bind.
    tokio::time::sleep(Duration::from_millis(200)).await;

    (format!("http://127.0.0.1:{port}"), ct, handle)
}

#[tokio::test]
async fn health_returns_status_json() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (base_url, ct, handle) = spawn_server(temp.path()).await;

    let resp = reqwest::get(format!("{base_url}/health"))
        .await
        .expect("HTTP GET /health");
    assert_eq!(resp.status(), 200);

    let body: HealthStatus = resp.json().await.expect("json body");
    assert_eq!(body.status, "healthy");
    assert_eq!(body.version, env!("CARGO_PKG_VERSION"));

    ct.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server stops in time")
        .expect("server task does not panic");
    assert!(result.is_ok());
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let temp = tempfile::tempdir().expect("tempdir");
    let (base_url, ct, _handle) = spawn_server(temp.path()).await;

    let resp = reqwest::get(format!("{base_url}/nowhere"))
        .await
        .expect("HTTP GET");
    assert_eq!(resp.status(), 404);

    ct.cancel();
}
