//! Inbound HTTP surface and proxy forwarding.
//!
//! Owns the axum router (a catch-all into the active pipeline plus the
//! built-in endpoints), the request entry point (request id, span, metrics)
//! and the actual HTTP/WebSocket forwarding used by the pipeline's dispatch
//! stage.
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, State};
use axum::response::Response;
use axum::Router;
use http::{header, Method, Request, StatusCode, Uri};
use serde::Deserialize;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::adapters::pipeline::{json_error, json_response, RequestPipeline};
use crate::adapters::ws_forwarder;
use crate::config::models::AuthMode;
use crate::core::gateway::{SelectedTarget, ENV_HEADER};
use crate::metrics;
use crate::tracing_setup;

/// Join two path segments with exactly one `/` between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    let a_slash = a.ends_with('/');
    let b_slash = b.starts_with('/');
    match (a_slash, b_slash) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// Top-level application state: the hot-swappable pipeline plus process
/// facts for the status surface.
pub struct GatewayApp {
    pipeline: ArcSwap<RequestPipeline>,
    started_at: Instant,
}

impl GatewayApp {
    pub fn new(pipeline: Arc<RequestPipeline>) -> Arc<Self> {
        Arc::new(Self {
            pipeline: ArcSwap::new(pipeline),
            started_at: Instant::now(),
        })
    }

    pub fn pipeline(&self) -> Arc<RequestPipeline> {
        self.pipeline.load_full()
    }

    /// Swap in a new pipeline, returning the old one so the caller can tear
    /// down its background tasks after in-flight requests drain.
    pub fn swap_pipeline(&self, new: Arc<RequestPipeline>) -> Arc<RequestPipeline> {
        self.pipeline.swap(new)
    }

    /// Build the axum router. Panic recovery is the outermost layer.
    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .fallback(entry)
            .layer(CatchPanicLayer::custom(|_: Box<dyn std::any::Any + Send>| {
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }))
            .with_state(self.clone())
    }
}

/// Request entry: span + metrics wrap built-in endpoints and the pipeline.
async fn entry(
    State(app): State<Arc<GatewayApp>>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    req: Request<Body>,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = Uuid::new_v4().to_string();
    let client_ip = client_addr.ip().to_string();

    let span = tracing_setup::create_request_span(
        method.as_str(),
        &path,
        &request_id,
        Some(&client_ip),
    );

    let timer = metrics::RequestTimer::new(method.as_str(), &path);
    let response = handle_request(&app, req, client_addr)
        .instrument(span.clone())
        .await;
    drop(timer);

    let status = response.status().as_u16();
    span.record("http.status_code", status);
    metrics::increment_request_total(method.as_str(), &path, status);
    response
}

async fn handle_request(
    app: &Arc<GatewayApp>,
    req: Request<Body>,
    client_addr: SocketAddr,
) -> Response {
    let pipeline = app.pipeline();
    let path = req.uri().path().to_string();

    if req.method() == Method::POST && path == "/login" {
        return login(&pipeline, req).await;
    }
    if req.method() == Method::GET {
        if path == "/health" {
            return json_response(StatusCode::OK, serde_json::json!({"status": "ok"}));
        }
        if path == "/status" {
            return status(app, &pipeline).await;
        }
        if pipeline.config.observability.prometheus.enabled
            && path == pipeline.config.observability.prometheus.path
        {
            return Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
                .body(Body::from(metrics::render_prometheus()))
                .unwrap_or_else(|_| {
                    json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                });
        }
    }

    pipeline.handle(req, Some(client_addr)).await
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// `POST /login`. Credential verification is a stand-in; token issuance
/// goes through the token authority port.
async fn login(pipeline: &RequestPipeline, req: Request<Body>) -> Response {
    use http_body_util::BodyExt;

    let bytes = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "Invalid request"),
    };
    let creds: LoginRequest = match serde_json::from_slice(&bytes) {
        Ok(creds) => creds,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "Invalid request"),
    };
    if creds.username.is_empty() || creds.password.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "Invalid request");
    }

    if creds.username != "admin" || creds.password != "password" {
        tracing::warn!(username = %creds.username, "login failed");
        return json_error(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }

    match pipeline.config.security.auth_mode {
        AuthMode::Jwt => match pipeline.issue_token(&creds.username) {
            Ok(token) => json_response(StatusCode::OK, serde_json::json!({"token": token})),
            Err(err) => {
                tracing::error!(error = %err, "token issuance failed");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
            }
        },
        AuthMode::Rbac => match pipeline.issue_token(&creds.username) {
            Ok(token) => json_response(
                StatusCode::OK,
                serde_json::json!({"token": token, "username": creds.username}),
            ),
            Err(err) => {
                tracing::error!(error = %err, "token issuance failed");
                json_error(StatusCode::INTERNAL_SERVER_ERROR, "Server error")
            }
        },
        AuthMode::None => json_response(
            StatusCode::OK,
            serde_json::json!({"message": "Login successful", "username": creds.username}),
        ),
    }
}

/// `GET /status`: gateway process facts, backend stats, balancer state and
/// the compiled-in middleware set.
async fn status(app: &Arc<GatewayApp>, pipeline: &RequestPipeline) -> Response {
    let backend_stats = pipeline.health.snapshot();
    let unhealthy = pipeline.health.unhealthy_targets();
    let gateway = pipeline.gateway();

    let runtime_metrics = tokio::runtime::Handle::current().metrics();
    let body = serde_json::json!({
        "status": "ok",
        "gateway": {
            "uptime_secs": app.started_at.elapsed().as_secs(),
            "version": env!("CARGO_PKG_VERSION"),
            "memory_rss_bytes": resident_memory_bytes(),
            "tasks_alive": runtime_metrics.num_alive_tasks(),
        },
        "backend_stats": backend_stats,
        "load_balancer": {
            "type": gateway.balancer_kind().as_str(),
            "active_targets": gateway.active_targets().len(),
            "unhealthy_targets": unhealthy,
        },
        "plugins": plugin_statuses(pipeline),
    });
    json_response(StatusCode::OK, body)
}

/// Per-stage descriptors for the status surface, sorted by name.
fn plugin_statuses(pipeline: &RequestPipeline) -> Vec<serde_json::Value> {
    let version = env!("CARGO_PKG_VERSION");
    let mw = &pipeline.config.middleware;
    let mut plugins = vec![
        ("anti_injection", "Injection pattern scanning", mw.anti_injection),
        ("auth", "Bearer token authentication", mw.auth),
        ("breaker", "Per-route circuit breaking", mw.breaker),
        ("ip_acl", "IP access lists", mw.ip_acl),
        ("rate_limit", "Global admission control", mw.rate_limit),
        ("tracing", "Request span emission", mw.tracing),
    ];
    plugins.sort_by_key(|(name, _, _)| *name);
    plugins
        .into_iter()
        .map(|(name, description, enabled)| {
            serde_json::json!({
                "name": name,
                "version": version,
                "description": description,
                "enabled": enabled,
            })
        })
        .collect()
}

/// Resident set size from /proc, 0 where unavailable.
fn resident_memory_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(statm) = std::fs::read_to_string("/proc/self/statm") {
            if let Some(resident_pages) = statm
                .split_whitespace()
                .nth(1)
                .and_then(|v| v.parse::<u64>().ok())
            {
                return resident_pages * 4096;
            }
        }
    }
    0
}

/// Forward an HTTP request to the selected target (spec'd proxy path: one
/// joining slash, Host rewrite, canary egress header, 502 on transport
/// error).
pub async fn forward_http(
    pipeline: &RequestPipeline,
    req: Request<Body>,
    selected: &SelectedTarget,
) -> Response {
    let target_url = match Url::parse(&selected.target) {
        Ok(url) => url,
        Err(err) => {
            tracing::error!(target = %selected.target, error = %err, "invalid target URL");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Invalid target URL");
        }
    };

    let (mut parts, body) = req.into_parts();

    let joined_path = single_joining_slash(target_url.path(), parts.uri.path());
    let authority = match (target_url.host_str(), target_url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        _ => {
            tracing::error!(target = %selected.target, "target URL has no host");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Invalid target URL");
        }
    };
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{joined_path}?{query}"),
        None => joined_path,
    };

    let outgoing_uri = match Uri::builder()
        .scheme(target_url.scheme())
        .authority(authority.as_str())
        .path_and_query(path_and_query.as_str())
        .build()
    {
        Ok(uri) => uri,
        Err(err) => {
            tracing::error!(target = %selected.target, error = %err, "failed to build outgoing URI");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "Invalid target URL");
        }
    };
    parts.uri = outgoing_uri;

    if selected.is_canary() {
        parts
            .headers
            .insert(ENV_HEADER, crate::adapters::pipeline::canary_env_value());
    }

    let method = parts.method.clone();
    let span = tracing_setup::create_backend_span(&selected.target, method.as_str(), path_and_query.as_str());
    let outgoing = Request::from_parts(parts, body);

    match pipeline
        .http_client
        .send_request(outgoing)
        .instrument(span)
        .await
    {
        Ok(response) => {
            let status = response.status().as_u16();
            metrics::increment_backend_request(&selected.target, status);
            pipeline
                .health
                .update_request_count(&selected.target, status < 400);
            response
        }
        Err(err) => {
            tracing::error!(target = %selected.target, error = %err, "proxy request failed");
            metrics::increment_backend_request(&selected.target, 502);
            pipeline.health.update_request_count(&selected.target, false);
            json_error(StatusCode::BAD_GATEWAY, "Bad Gateway")
        }
    }
}

/// Upgrade the client connection and relay frames to the selected target.
pub async fn forward_websocket(
    pipeline: &RequestPipeline,
    req: Request<Body>,
    selected: &SelectedTarget,
) -> Response {
    let (mut parts, _body) = req.into_parts();
    let query = parts.uri.query().map(str::to_string);
    let path = parts.uri.path().to_string();

    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(_) => {
            return json_error(StatusCode::BAD_REQUEST, "WebSocket upgrade required");
        }
    };

    let dial = ws_forwarder::dial_url(&selected.target, &path, query.as_deref());
    let idle_timeout =
        std::time::Duration::from_secs(pipeline.config.performance.idle_timeout_secs.max(1));

    pipeline.health.update_request_count(&selected.target, true);
    ws_forwarder::upgrade_and_relay(upgrade, dial, idle_timeout)
}
