//! End-to-end canary steering through the request pipeline.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::Router;
use http::Request;
use myelin::adapters::{HttpClientAdapter, MemoryAclStore, ProtocolProber, RequestPipeline};
use myelin::config::models::{BalancerKind, GatewayConfig, Protocol, RouteEngine, RoutingRule};
use myelin::core::health::HealthChecker;
use myelin::ports::http_client::HttpClient;

struct Backend {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    canary_hits: Arc<AtomicUsize>,
}

async fn spawn_backend() -> Backend {
    let hits = Arc::new(AtomicUsize::new(0));
    let canary_hits = Arc::new(AtomicUsize::new(0));

    let hits_handle = hits.clone();
    let canary_handle = canary_hits.clone();
    let app = Router::new().fallback(move |req: Request<Body>| {
        let hits = hits_handle.clone();
        let canary = canary_handle.clone();
        async move {
            hits.fetch_add(1, Ordering::Relaxed);
            let is_canary = req
                .headers()
                .get("X-Env")
                .is_some_and(|v| v.as_bytes() == b"canary");
            if is_canary {
                canary.fetch_add(1, Ordering::Relaxed);
            }
            "ok"
        }
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Backend {
        addr,
        hits,
        canary_hits,
    }
}

fn rule(addr: SocketAddr, weight: u32, env: &str) -> RoutingRule {
    RoutingRule {
        target: format!("http://{addr}"),
        weight,
        env: Some(env.to_string()),
        protocol: Protocol::Http,
        health_check_path: "/health".to_string(),
    }
}

fn bare_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.middleware.rate_limit = false;
    config.middleware.ip_acl = false;
    config.middleware.anti_injection = false;
    config.middleware.auth = false;
    config.middleware.breaker = false;
    config
}

async fn build_pipeline(config: GatewayConfig) -> Arc<RequestPipeline> {
    let config = Arc::new(config);
    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new(&config.performance));
    let prober = Arc::new(ProtocolProber::new(http_client.clone()));
    let health = HealthChecker::new(&config, prober);
    Arc::new(RequestPipeline::build(
        config,
        http_client,
        health,
        Arc::new(MemoryAclStore::new()),
        None,
        None,
    ))
}

fn request(path: &str, env_header: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(path);
    if let Some(env) = env_header {
        builder = builder.header("X-Env", env);
    }
    builder.body(Body::empty()).unwrap()
}

const CLIENT: &str = "10.0.0.1:40000";

#[tokio::test(flavor = "multi_thread")]
async fn weighted_split_without_header() {
    let stable = spawn_backend().await;
    let canary = spawn_backend().await;

    let mut config = bare_config();
    config.routing.engine = RouteEngine::TrieRegexp;
    config.routing.load_balancer = BalancerKind::WeightedRoundRobin;
    config.routing.rules.insert(
        "/api/v1/user".to_string(),
        vec![rule(stable.addr, 80, "stable"), rule(canary.addr, 20, "canary")],
    );
    let pipeline = build_pipeline(config).await;

    let client_addr: SocketAddr = CLIENT.parse().unwrap();
    for _ in 0..100 {
        let response = pipeline
            .handle(request("/api/v1/user", None), Some(client_addr))
            .await;
        assert_eq!(response.status(), 200);
    }

    assert_eq!(stable.hits.load(Ordering::Relaxed), 80);
    assert_eq!(canary.hits.load(Ordering::Relaxed), 20);
    // No canary marking on stable traffic.
    assert_eq!(canary.canary_hits.load(Ordering::Relaxed), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn canary_header_steers_and_marks_egress() {
    let stable = spawn_backend().await;
    let canary = spawn_backend().await;

    let mut config = bare_config();
    config.routing.engine = RouteEngine::TrieRegexp;
    config.routing.load_balancer = BalancerKind::WeightedRoundRobin;
    config.routing.rules.insert(
        "/api/v1/user".to_string(),
        vec![rule(stable.addr, 80, "stable"), rule(canary.addr, 20, "canary")],
    );
    let pipeline = build_pipeline(config).await;

    let client_addr: SocketAddr = CLIENT.parse().unwrap();
    for _ in 0..100 {
        let response = pipeline
            .handle(request("/api/v1/user", Some("canary")), Some(client_addr))
            .await;
        assert_eq!(response.status(), 200);
    }

    assert_eq!(stable.hits.load(Ordering::Relaxed), 0);
    assert_eq!(canary.hits.load(Ordering::Relaxed), 100);
    // Every canary-steered forward carries X-Env: canary.
    assert_eq!(canary.canary_hits.load(Ordering::Relaxed), 100);
}

#[tokio::test(flavor = "multi_thread")]
async fn canary_header_falls_back_without_canary_rules() {
    let stable = spawn_backend().await;

    let mut config = bare_config();
    config.routing.engine = RouteEngine::TrieRegexp;
    config.routing.load_balancer = BalancerKind::RoundRobin;
    config
        .routing
        .rules
        .insert("/api/v1/order".to_string(), vec![rule(stable.addr, 1, "stable")]);
    let pipeline = build_pipeline(config).await;

    let client_addr: SocketAddr = CLIENT.parse().unwrap();
    let response = pipeline
        .handle(request("/api/v1/order", Some("canary")), Some(client_addr))
        .await;
    assert_eq!(response.status(), 200);
    assert_eq!(stable.hits.load(Ordering::Relaxed), 1);
    assert_eq!(stable.canary_hits.load(Ordering::Relaxed), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn unmatched_path_is_404_and_empty_candidates_503() {
    let mut config = bare_config();
    config.routing.engine = RouteEngine::TrieRegexp;
    config.routing.load_balancer = BalancerKind::WeightedRoundRobin;
    config.routing.rules.insert(
        "/api/v1/zero".to_string(),
        vec![RoutingRule {
            target: "http://127.0.0.1:9".to_string(),
            weight: 0,
            env: None,
            protocol: Protocol::Http,
            health_check_path: "/health".to_string(),
        }],
    );
    let pipeline = build_pipeline(config).await;
    let client_addr: SocketAddr = CLIENT.parse().unwrap();

    let response = pipeline
        .handle(request("/nope", None), Some(client_addr))
        .await;
    assert_eq!(response.status(), 404);

    // All weights zero: the balancer yields no target.
    let response = pipeline
        .handle(request("/api/v1/zero", None), Some(client_addr))
        .await;
    assert_eq!(response.status(), 503);
}
