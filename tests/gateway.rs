//! End-to-end tests through a running gateway.

use std::time::Duration;

use query_gateway::config::schema::{BackendConfig, GatewayConfig, StatsDialect};
use query_gateway::{Gateway, GatewayHandle};
use serde_json::Value;

mod common;

use common::{eventually, MockEngine};

fn backend(engine: &MockEngine) -> BackendConfig {
    BackendConfig {
        name: engine.name.to_string(),
        base_url: engine.url(),
        routing_group: "adhoc".to_string(),
        active: true,
        dialect: StatsDialect::Presto,
    }
}

fn config(backends: Vec<BackendConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.admin.enabled = true;
    config.admin.bind_address = "127.0.0.1:0".to_string();
    config.monitor.interval_secs = 1;
    config.monitor.timeout_secs = 2;
    config.continuation.grace_period_secs = 1;
    config.backends = backends;
    config
}

fn gateway_url(gateway: &GatewayHandle, path: &str) -> String {
    format!("http://{}{}", gateway.local_addr(), path)
}

async fn submit(gateway: &GatewayHandle, sql: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(gateway_url(gateway, "/v1/statement"))
        .header("X-Trino-User", "alice")
        .body(sql.to_string())
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_query_sticks_to_its_backend_and_is_continued() {
    let e1 = MockEngine::start("e1", 0).await;
    let e2 = MockEngine::start("e2", 0).await;
    let gateway = Gateway::start(config(vec![backend(&e1), backend(&e2)])).await.unwrap();

    let response = submit(&gateway, "SELECT 1").await;
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    let body: Value = response.json().await.unwrap();
    let query_id = body["id"].as_str().unwrap().to_string();

    let (owner, other) = if query_id.starts_with("e1_") { (&e1, &e2) } else { (&e2, &e1) };
    assert_eq!(
        gateway.router().find_backend_for_query(&query_id),
        Some(owner.url())
    );

    // The gateway follows the nextUri chain on its own.
    let cache = gateway.cache().clone();
    let id = query_id.clone();
    assert!(eventually(Duration::from_secs(5), || cache.is_completed(&id)).await);
    assert_eq!(cache.state(&query_id).as_deref(), Some("COMPLETED"));

    // A client poll goes to the owning cluster.
    let poll = reqwest::get(gateway_url(&gateway, &format!("/v1/statement/executing/{query_id}/t/1")))
        .await
        .unwrap();
    assert_eq!(poll.status(), 200);
    assert!(owner.received(&query_id).len() >= 3);
    assert!(other.received(&query_id).is_empty());

    // Reconnecting clients can read the final step from the cache.
    let cached = reqwest::get(gateway_url(&gateway, &format!("/cached/v1/statement/executing/{query_id}/t/2")))
        .await
        .unwrap();
    assert_eq!(cached.status(), 200);
    assert_eq!(cached.headers()["x-gateway-cached"], "true");
    assert!(cached.text().await.unwrap().contains("FINISHED"));

    let initial = cache.initial_request(&query_id).unwrap();
    assert_eq!(initial.body, "SELECT 1");

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_no_backends_is_service_unavailable() {
    let gateway = Gateway::start(config(Vec::new())).await.unwrap();

    let response = submit(&gateway, "SELECT 1").await;
    assert_eq!(response.status(), 503);

    let missing = reqwest::get(gateway_url(&gateway, "/cached/v1/statement/executing/nope/t/1"))
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_other_paths_go_to_local_application() {
    let local_addr = common::start_programmable_backend(|request| {
        (200, format!(r#"{{"local":true,"path":"{}"}}"#, request.path))
    })
    .await;
    let e1 = MockEngine::start("e1", 0).await;

    let mut config = config(vec![backend(&e1)]);
    config.gateway.local_application_port = local_addr.port();
    let gateway = Gateway::start(config).await.unwrap();

    let body: Value = reqwest::get(gateway_url(&gateway, "/api/clusters"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["local"], true);
    assert_eq!(body["path"], "/api/clusters");
    assert!(e1.received("/api/clusters").is_empty());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_admin_api_reports_routing() {
    let idle = MockEngine::start("idle", 0).await;
    let busy = MockEngine::start("busy", 10).await;
    let gateway = Gateway::start(config(vec![backend(&idle), backend(&busy)])).await.unwrap();
    let admin = gateway.admin_addr().unwrap();

    let routing: Value = reqwest::get(format!("http://{admin}/admin/routing/adhoc"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(routing["active"], true);
    assert_eq!(routing["queue_lengths"]["busy"], 10);
    assert_eq!(routing["weights"]["idle"], 100);
    assert_eq!(routing["weights"]["busy"], 1);

    let backends: Value = reqwest::get(format!("http://{admin}/admin/backends"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(backends.as_array().unwrap().len(), 2);
    assert_eq!(backends[0]["stats"]["healthy"], true);

    let unknown = reqwest::get(format!("http://{admin}/admin/routing/nope")).await.unwrap();
    assert_eq!(unknown.status(), 404);

    let status: Value = reqwest::get(format!("http://{admin}/admin/status"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["status"], "operational");
    assert_eq!(status["healthy_backends"], 2);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_dropped_queries_survive_restart() {
    let e1 = MockEngine::start("e1", 0).await;
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("cache.json");

    let mut first = config(vec![backend(&e1)]);
    first.cache.snapshot_path = Some(snapshot.to_string_lossy().into_owned());
    first.continuation.enabled = false;
    let gateway = Gateway::start(first.clone()).await.unwrap();

    // Park a query mid-chain, as a shutdown during polling would.
    let cache = gateway.cache().clone();
    cache.record_pending(
        "e1_parked",
        &query_gateway::cache::PendingStep {
            next_uri: format!("{}/v1/statement/executing/e1_parked/t/2", e1.url()),
            host: String::new(),
            backend_url: e1.url(),
        },
    );
    cache.push_dropped("e1_parked");
    gateway.shutdown().await;
    assert!(snapshot.exists());

    let mut second = first;
    second.continuation.enabled = true;
    let gateway = Gateway::start(second).await.unwrap();
    let cache = gateway.cache().clone();
    assert!(eventually(Duration::from_secs(5), || cache.is_completed("e1_parked")).await);
    assert_eq!(e1.received("/e1_parked/t/2").len(), 1);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_failed_query_is_resubmitted_to_another_backend() {
    let bad = MockEngine::start_failing("bad", 0).await;
    let good = MockEngine::start("good", 10).await;

    // Resubmissions come back through the gateway, so it needs a known port.
    let addr = common::unused_addr().await;
    let mut config = config(vec![backend(&bad), backend(&good)]);
    config.listener.bind_address = addr.to_string();
    config.continuation.retry_endpoint = format!("http://{addr}/v1/statement");
    config.retries.base_delay_ms = 10;
    let gateway = Gateway::start(config).await.unwrap();

    // Queue lengths weigh the failing backend 100 to 1.
    let mut failed_id = None;
    for _ in 0..20 {
        let body: Value = submit(&gateway, "SELECT 1").await.json().await.unwrap();
        let id = body["id"].as_str().unwrap().to_string();
        if id.starts_with("bad_") {
            failed_id = Some(id);
            break;
        }
    }
    let failed_id = failed_id.expect("a query landed on the failing backend");

    let resubmitted = || {
        good.submissions()
            .into_iter()
            .find(|(_, request)| request.header("x-gateway-transaction-id") == Some(failed_id.as_str()))
    };
    assert!(eventually(Duration::from_secs(5), || resubmitted().is_some()).await);
    let (retried_id, request) = resubmitted().unwrap();
    assert_eq!(request.header("x-gateway-exclude-backend"), Some(bad.url().as_str()));
    assert_eq!(request.header("x-trino-user"), Some("alice"));
    assert_eq!(request.body, "SELECT 1");

    let cache = gateway.cache().clone();
    let id = retried_id.clone();
    assert!(eventually(Duration::from_secs(5), || cache.is_completed(&id)).await);
    assert_eq!(cache.state(&retried_id).as_deref(), Some("COMPLETED"));
    assert_eq!(cache.transaction_id(&retried_id), failed_id);
    assert_eq!(cache.retries(&failed_id), 1);
    assert!(cache.is_completed(&failed_id));
    assert_eq!(gateway.router().find_backend_for_query(&retried_id), Some(good.url()));
    assert_eq!(bad.submissions().iter().filter(|(id, _)| *id == failed_id).count(), 1);

    gateway.shutdown().await;
}
