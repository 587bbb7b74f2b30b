// tests/integration/health_server_test.rs

//! Integration tests for the HTTP health surface
//! Tests: /ping, /health, /diag, /metrics and graceful shutdown

use super::test_helpers::TestContext;
use gatebridge::core::upstream::SimulatedGateway;
use gatebridge::server::http;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl RunningServer {
    async fn start(ctx: &TestContext) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = tokio::spawn(http::serve(listener, ctx.state.clone(), shutdown_rx));
        Self {
            addr,
            shutdown_tx,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn get_json(&self, path: &str) -> Value {
        let response = reqwest::get(self.url(path)).await.unwrap();
        assert!(response.status().is_success(), "GET {path}: {}", response.status());
        response.json().await.unwrap()
    }

    async fn stop(self) {
        self.shutdown_tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not shut down")
            .unwrap();
        assert!(result.is_ok());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ping() {
    let ctx = TestContext::new();
    let server = RunningServer::start(&ctx).await;

    let body = server.get_json("/ping").await;
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].as_i64().unwrap() > 0);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_reports_ready_connection() {
    let ctx = TestContext::connected();
    ctx.supervisor.tick();
    let server = RunningServer::start(&ctx).await;

    let body = server.get_json("/health").await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["ready"], true);
    assert_eq!(body["state"], "ready");
    assert_eq!(body["connected"], true);
    assert_eq!(body["epoch"], 1);
    assert_eq!(body["readySinceEpoch"], 1);
    assert_eq!(body["gateway"]["port"], 4002);
    assert_eq!(body["gateway"]["tradingMode"], "paper");
    assert_eq!(body["gateway"]["clientType"], "gateway");
    assert_eq!(body["locks"]["historical"]["capacity"], 1);
    assert_eq!(body["locks"]["market"]["inflight"], 0);
    assert_eq!(body["diagnostics"]["reconnectAttempts"], 1);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_reports_disconnected() {
    let ctx = TestContext::connected();
    ctx.state.status.clear();
    let server = RunningServer::start(&ctx).await;

    let body = server.get_json("/health").await;
    assert_eq!(body["status"], "disconnected");
    assert_eq!(body["ready"], false);
    assert_eq!(body["state"], "disconnected");
    assert_eq!(body["readySinceEpoch"], Value::Null);
    assert_eq!(body["epoch"], 1);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_diag_includes_loop_and_timings() {
    let ctx = TestContext::connected();
    ctx.state.cache.write("quotes", "AAPL", serde_json::json!({ "last": 1 }));
    let server = RunningServer::start(&ctx).await;

    let body = server.get_json("/diag").await;
    assert_eq!(body["ready"], true);
    assert_eq!(body["loop"]["running"], true);
    assert!(body["loop"]["jobsExecuted"].as_u64().unwrap() >= 1);
    assert_eq!(body["supervisor"]["heartbeat_failures_before_exit"], 3);
    assert_eq!(body["supervisor"]["heartbeat_interval"], "20ms");
    assert_eq!(body["bridge"]["poll_interval"], "10ms");
    assert_eq!(body["cacheEntries"]["quotes"], 1);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_metrics_exposition() {
    let ctx = TestContext::connected();
    let server = RunningServer::start(&ctx).await;

    let response = reqwest::get(server.url("/metrics")).await.unwrap();
    assert!(response.status().is_success());
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    let text = response.text().await.unwrap();
    assert!(text.contains("gatebridge_ready"));
    assert!(text.contains("gatebridge_epoch"));
    assert!(text.contains("gatebridge_reconnect_attempts_total"));

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_health_stays_responsive_while_loop_is_busy() {
    let ctx = TestContext::connected();
    let server = RunningServer::start(&ctx).await;

    let state = ctx.state.clone();
    let wedge = tokio::task::spawn_blocking(move || {
        state.bridge.query(
            |_: &mut SimulatedGateway| std::thread::sleep(Duration::from_millis(800)),
            Duration::from_secs(2),
        )
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let start = Instant::now();
    let body = server.get_json("/health").await;
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(body["ready"], true);

    assert!(wedge.await.unwrap().is_ok());
    server.stop().await;
}
