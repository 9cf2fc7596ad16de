//! Hot-reload behavior: a pipeline swap changes the routing engine and rule
//! set atomically for new requests.
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::Router;
use http::Request;
use myelin::adapters::{
    GatewayApp, HttpClientAdapter, MemoryAclStore, ProtocolProber, RequestPipeline,
};
use myelin::config::models::{GatewayConfig, Protocol, RouteEngine, RoutingRule};
use myelin::core::health::HealthChecker;
use myelin::ports::http_client::HttpClient;

async fn spawn_backend() -> SocketAddr {
    let app = Router::new().fallback(|| async { "ok" });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn rule(addr: SocketAddr) -> RoutingRule {
    RoutingRule {
        target: format!("http://{addr}"),
        weight: 1,
        env: None,
        protocol: Protocol::Http,
        health_check_path: "/health".to_string(),
    }
}

fn bare_config(engine: RouteEngine) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.middleware.rate_limit = false;
    config.middleware.ip_acl = false;
    config.middleware.anti_injection = false;
    config.middleware.auth = false;
    config.middleware.breaker = false;
    config.routing.engine = engine;
    config
}

struct TestHarness {
    http_client: Arc<dyn HttpClient>,
    health: Arc<HealthChecker>,
    acl_store: Arc<MemoryAclStore>,
}

impl TestHarness {
    fn new(config: &Arc<GatewayConfig>) -> Self {
        let http_client: Arc<dyn HttpClient> =
            Arc::new(HttpClientAdapter::new(&config.performance));
        let prober = Arc::new(ProtocolProber::new(http_client.clone()));
        let health = HealthChecker::new(config, prober);
        Self {
            http_client,
            health,
            acl_store: Arc::new(MemoryAclStore::new()),
        }
    }

    fn pipeline(&self, config: Arc<GatewayConfig>) -> Arc<RequestPipeline> {
        Arc::new(RequestPipeline::build(
            config,
            self.http_client.clone(),
            self.health.clone(),
            self.acl_store.clone(),
            None,
            None,
        ))
    }
}

fn request(path: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

const CLIENT: &str = "10.0.0.1:40000";

#[tokio::test(flavor = "multi_thread")]
async fn reload_switches_engine_and_rules() {
    let backend = spawn_backend().await;
    let client_addr: SocketAddr = CLIENT.parse().unwrap();

    // Before: trie engine, literal rule only.
    let mut before = bare_config(RouteEngine::Trie);
    before
        .routing
        .rules
        .insert("/api/v1/x".to_string(), vec![rule(backend)]);
    let before = Arc::new(before);

    let harness = TestHarness::new(&before);
    let app = GatewayApp::new(harness.pipeline(before.clone()));

    let response = app
        .pipeline()
        .handle(request("/api/v1/x"), Some(client_addr))
        .await;
    assert_eq!(response.status(), 200);

    let response = app
        .pipeline()
        .handle(request("/api/v7/x"), Some(client_addr))
        .await;
    assert_eq!(response.status(), 404);

    // After: hybrid engine adds a digit-class rule.
    let mut after = bare_config(RouteEngine::TrieRegexp);
    after
        .routing
        .rules
        .insert("/api/v1/x".to_string(), vec![rule(backend)]);
    after
        .routing
        .rules
        .insert("/api/v\\d+/x".to_string(), vec![rule(backend)]);
    let after = Arc::new(after);

    let old = app.swap_pipeline(harness.pipeline(after.clone()));
    harness.health.refresh_targets(&after);
    old.teardown();

    let response = app
        .pipeline()
        .handle(request("/api/v7/x"), Some(client_addr))
        .await;
    assert_eq!(response.status(), 200);

    // Literal rule still resolves after the swap.
    let response = app
        .pipeline()
        .handle(request("/api/v1/x"), Some(client_addr))
        .await;
    assert_eq!(response.status(), 200);
}

#[tokio::test(flavor = "multi_thread")]
async fn health_counters_survive_reload_for_surviving_targets() {
    let backend = spawn_backend().await;
    let client_addr: SocketAddr = CLIENT.parse().unwrap();

    let mut before = bare_config(RouteEngine::TrieRegexp);
    before
        .routing
        .rules
        .insert("/api/v1/x".to_string(), vec![rule(backend)]);
    let before = Arc::new(before);

    let harness = TestHarness::new(&before);
    let app = GatewayApp::new(harness.pipeline(before.clone()));

    for _ in 0..3 {
        let response = app
            .pipeline()
            .handle(request("/api/v1/x"), Some(client_addr))
            .await;
        assert_eq!(response.status(), 200);
    }
    assert_eq!(harness.health.snapshot()[0].request_count, 3);

    // Reload keeps the target; its counters carry over.
    let mut after = bare_config(RouteEngine::TrieRegexp);
    after
        .routing
        .rules
        .insert("/api/v1/x".to_string(), vec![rule(backend)]);
    after
        .routing
        .rules
        .insert("/api/v1/y".to_string(), vec![rule(backend)]);
    let after = Arc::new(after);

    let old = app.swap_pipeline(harness.pipeline(after.clone()));
    harness.health.refresh_targets(&after);
    old.teardown();

    assert_eq!(harness.health.snapshot()[0].request_count, 3);

    let response = app
        .pipeline()
        .handle(request("/api/v1/y"), Some(client_addr))
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(harness.health.snapshot()[0].request_count, 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn requests_see_old_or_new_pipeline_never_a_mix() {
    let backend = spawn_backend().await;
    let client_addr: SocketAddr = CLIENT.parse().unwrap();

    let mut before = bare_config(RouteEngine::Trie);
    before
        .routing
        .rules
        .insert("/api/v1/x".to_string(), vec![rule(backend)]);
    let before = Arc::new(before);

    let harness = TestHarness::new(&before);
    let app = GatewayApp::new(harness.pipeline(before.clone()));

    // A pipeline handle captured before the swap keeps serving the old
    // snapshot even while the app already routes new requests to the new
    // one.
    let captured = app.pipeline();

    let mut after = bare_config(RouteEngine::TrieRegexp);
    after
        .routing
        .rules
        .insert("/api/v\\d+/x".to_string(), vec![rule(backend)]);
    let after = Arc::new(after);
    let old = app.swap_pipeline(harness.pipeline(after.clone()));

    let response = captured
        .handle(request("/api/v1/x"), Some(client_addr))
        .await;
    assert_eq!(response.status(), 200, "old snapshot still serves its rules");

    let response = app
        .pipeline()
        .handle(request("/api/v1/x"), Some(client_addr))
        .await;
    assert_eq!(response.status(), 200, "regex rule covers v1 in new snapshot");

    let response = captured
        .handle(request("/api/v7/x"), Some(client_addr))
        .await;
    assert_eq!(response.status(), 404, "old snapshot has no regex rule");

    old.teardown();
}
