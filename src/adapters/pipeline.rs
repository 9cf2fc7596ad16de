//! The request pipeline.
//!
//! One `RequestPipeline` instance embodies a configuration snapshot: the
//! middleware stages in their fixed order, the route resolver, the load
//! balancer and the protocol handlers. A reload builds a fresh pipeline and
//! swaps it in atomically; requests mid-flight keep the instance they
//! entered with, so they observe either the old or the new configuration in
//! full, never a mix.
//!
//! Stage order (outermost first): rate limit, IP ACL, anti-injection,
//! authentication, circuit breaker, tracing, route dispatch, protocol
//! proxy. Panic recovery and request metrics wrap the pipeline at the
//! server layer.
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use http::{header, Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use tracing::Instrument;

use crate::adapters::grpc_bridge::GrpcBridge;
use crate::adapters::http_handler;
use crate::config::models::{AuthMode, GatewayConfig, Protocol};
use crate::core::breaker::{BreakerRegistry, CommandOutcome};
use crate::core::gateway::{GatewayService, CANARY_ENV, ENV_HEADER, STABLE_ENV};
use crate::core::health::HealthChecker;
use crate::core::limiter::{Admission, RateLimiter};
use crate::core::security::{anti_injection, IpAcl};
use crate::metrics;
use crate::ports::acl_store::AclStore;
use crate::ports::auth::{PolicyEngine, TokenAuthority};
use crate::ports::http_client::HttpClient;

pub struct RequestPipeline {
    pub(crate) config: Arc<GatewayConfig>,
    pub(crate) gateway: Arc<GatewayService>,
    pub(crate) http_client: Arc<dyn HttpClient>,
    pub(crate) health: Arc<HealthChecker>,
    pub(crate) grpc_bridge: Arc<GrpcBridge>,
    limiter: Option<RateLimiter>,
    acl: Option<IpAcl>,
    breakers: Option<Arc<BreakerRegistry>>,
    token_authority: Option<Arc<dyn TokenAuthority>>,
    policy_engine: Option<Arc<dyn PolicyEngine>>,
}

impl RequestPipeline {
    /// Assemble a pipeline for one configuration snapshot.
    pub fn build(
        config: Arc<GatewayConfig>,
        http_client: Arc<dyn HttpClient>,
        health: Arc<HealthChecker>,
        acl_store: Arc<dyn AclStore>,
        token_authority: Option<Arc<dyn TokenAuthority>>,
        policy_engine: Option<Arc<dyn PolicyEngine>>,
    ) -> Self {
        let gateway = Arc::new(GatewayService::new(&config, http_client.clone()));
        let grpc_bridge = Arc::new(GrpcBridge::from_config(&config));

        let limiter = (config.middleware.rate_limit && config.traffic.rate_limit.enabled)
            .then(|| RateLimiter::from_config(&config.traffic.rate_limit));

        let acl = config
            .middleware
            .ip_acl
            .then(|| IpAcl::new(acl_store, &config.security));

        let breakers = (config.middleware.breaker && config.traffic.breaker.enabled).then(|| {
            Arc::new(BreakerRegistry::start(
                config.routing.rules.keys().cloned(),
                &config.traffic.breaker,
            ))
        });

        Self {
            config,
            gateway,
            http_client,
            health,
            grpc_bridge,
            limiter,
            acl,
            breakers,
            token_authority,
            policy_engine,
        }
    }

    /// Stop background tasks owned by this snapshot's components. Called
    /// when a reload swaps the pipeline out and at shutdown.
    pub fn teardown(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.teardown();
        }
        if let Some(breakers) = &self.breakers {
            breakers.teardown();
        }
    }

    pub fn gateway(&self) -> &Arc<GatewayService> {
        &self.gateway
    }

    /// Issue a bearer token through the configured authority.
    pub fn issue_token(&self, username: &str) -> crate::ports::auth::AuthResult<String> {
        match &self.token_authority {
            Some(authority) => authority.issue(username),
            None => Err(crate::ports::auth::AuthError::Issuance(
                "no token authority configured".to_string(),
            )),
        }
    }

    /// Run the middleware stages and dispatch the request.
    pub async fn handle(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Response<Body> {
        let path = req.uri().path().to_string();
        let client_ip = client_addr
            .map(|addr| addr.ip().to_string())
            .unwrap_or_default();

        // Rate limit.
        if let Some(limiter) = &self.limiter {
            match limiter.admit() {
                Admission::Allowed => {}
                Admission::Throttled { wait_ms } => {
                    metrics::increment_rate_limit_rejection(&path);
                    tracing::warn!(path = %path, client_ip = %client_ip, wait_ms,
                        "rate limit exceeded");
                    return self.rate_limit_response(wait_ms);
                }
            }
        }

        // IP ACL.
        if let Some(acl) = &self.acl {
            if acl.check(&client_ip).await.is_denied() {
                metrics::increment_ip_acl_rejection(&path);
                return json_error(StatusCode::FORBIDDEN, "Access denied by IP access list");
            }
        }

        // Anti-injection. May need to buffer and restore the body.
        let req = match self.anti_injection_stage(req, &path, &client_ip).await {
            Ok(req) => req,
            Err(response) => return response,
        };

        // Authentication.
        if let Err(response) = self.auth_stage(req.headers(), &path).await {
            return response;
        }

        // Circuit breaker wraps dispatch; tracing instruments it.
        let dispatch = self.dispatch(req, client_addr, &path);
        let traced = self.config.middleware.tracing;

        match &self.breakers {
            Some(breakers) => {
                // Commands are registered per configured pattern; requests
                // whose path is not itself a registered pattern (regex
                // routes) dispatch unguarded.
                match breakers.command(&path) {
                    Some(command) => {
                        let outcome = if traced {
                            let span = tracing::info_span!("breaker", route = %path);
                            command
                                .run(dispatch.instrument(span), |r: &Response<Body>| {
                                    r.status().as_u16() < 400
                                })
                                .await
                        } else {
                            command
                                .run(dispatch, |r: &Response<Body>| r.status().as_u16() < 400)
                                .await
                        };
                        match outcome {
                            CommandOutcome::Completed(response) => response,
                            CommandOutcome::Rejected(reason) => {
                                tracing::warn!(path = %path, reason = ?reason,
                                    "request short-circuited");
                                json_error(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable")
                            }
                        }
                    }
                    None => dispatch.await,
                }
            }
            None => dispatch.await,
        }
    }

    fn rate_limit_response(&self, wait_ms: u64) -> Response<Body> {
        let limit = &self.config.traffic.rate_limit;
        let body = if wait_ms > 0 {
            serde_json::json!({
                "error": "Request rate limit exceeded",
                "qps": limit.qps,
                "burst": limit.burst,
                "waitTimeMs": wait_ms,
            })
        } else {
            serde_json::json!({
                "error": "Request rate limit exceeded",
                "qps": limit.qps,
                "burst": limit.burst,
            })
        };
        json_response(StatusCode::TOO_MANY_REQUESTS, body)
    }

    async fn anti_injection_stage(
        &self,
        req: Request<Body>,
        path: &str,
        client_ip: &str,
    ) -> Result<Request<Body>, Response<Body>> {
        if !self.config.middleware.anti_injection {
            return Ok(req);
        }

        let deny = |hit: String, location: &str| {
            metrics::increment_injection_block(path);
            tracing::warn!(path = %path, ip = %client_ip, location, hit = %hit,
                "potential injection detected");
            json_error(StatusCode::FORBIDDEN, "Potential injection attack detected")
        };

        if let Some(query) = req.uri().query() {
            if let Some(hit) = anti_injection::scan_query(query) {
                return Err(deny(hit, "query"));
            }
        }

        let header_pairs = req
            .headers()
            .iter()
            .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)));
        if let Some(hit) = anti_injection::scan_headers(header_pairs) {
            return Err(deny(hit, "header"));
        }

        // JSON bodies of mutating methods are buffered, scanned and put back.
        let method = req.method().clone();
        if method == Method::POST || method == Method::PUT {
            let is_json = req
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|ct| ct.starts_with("application/json"));
            if is_json {
                let (parts, body) = req.into_parts();
                let bytes = match body.collect().await {
                    Ok(collected) => collected.to_bytes(),
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to read request body");
                        return Err(json_error(StatusCode::BAD_REQUEST, "Unreadable request body"));
                    }
                };
                if let Ok(doc) = serde_json::from_slice::<serde_json::Value>(&bytes) {
                    if let Some(hit) = anti_injection::scan_json(&doc) {
                        return Err(deny(hit, "body"));
                    }
                }
                return Ok(Request::from_parts(parts, Body::from(bytes)));
            }
        }

        Ok(req)
    }

    async fn auth_stage(
        &self,
        headers: &http::HeaderMap,
        path: &str,
    ) -> Result<(), Response<Body>> {
        if !self.config.middleware.auth || self.config.security.auth_mode == AuthMode::None {
            return Ok(());
        }

        let authority = match &self.token_authority {
            Some(authority) => authority,
            None => return Ok(()),
        };

        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        let token = match token {
            Some(token) => token,
            None => {
                return Err(json_error(
                    StatusCode::UNAUTHORIZED,
                    "Missing bearer token",
                ));
            }
        };

        let claims = match authority.verify(token) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::warn!(path = %path, error = %err, "token validation failed");
                return Err(json_error(StatusCode::UNAUTHORIZED, "Invalid token"));
            }
        };

        if self.config.security.auth_mode == AuthMode::Rbac {
            if let Some(policy) = &self.policy_engine {
                if !policy.allow(&claims.username, path).await {
                    tracing::warn!(path = %path, subject = %claims.username, "access denied by policy");
                    return Err(json_error(StatusCode::FORBIDDEN, "Access denied"));
                }
            }
        }

        Ok(())
    }

    /// Route dispatch and protocol proxying.
    async fn dispatch(
        &self,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
        path: &str,
    ) -> Response<Body> {
        // gRPC mounts match on prefix before general resolution.
        if self.grpc_bridge.serves(path) {
            let (_parts, body) = req.into_parts();
            return self.grpc_bridge.forward_request(path, body).await;
        }

        let rules = match self.gateway.resolve(path) {
            Some(rules) => rules,
            None => {
                tracing::warn!(path = %path, "route not found");
                return json_error(StatusCode::NOT_FOUND, "Route not found");
            }
        };

        let env = req
            .headers()
            .get(ENV_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .unwrap_or(STABLE_ENV)
            .to_string();

        let client_addr_str = client_addr.map(|a| a.to_string()).unwrap_or_default();
        let selected = match self
            .gateway
            .steer(&rules, &env, path, &client_addr_str)
        {
            Some(selected) => selected,
            None => {
                tracing::warn!(path = %path, env = %env, "no available targets");
                return json_error(StatusCode::SERVICE_UNAVAILABLE, "No available targets");
            }
        };

        let protocol = rules
            .iter()
            .find(|r| r.target == selected.target)
            .map(|r| r.protocol)
            .unwrap_or(Protocol::Http);

        match protocol {
            Protocol::Websocket => {
                http_handler::forward_websocket(self, req, &selected).await
            }
            _ => http_handler::forward_http(self, req, &selected).await,
        }
    }
}

/// Build a JSON error response with an `error` field, the gateway's uniform
/// short-circuit body.
pub fn json_error(status: StatusCode, message: &str) -> Response<Body> {
    json_response(status, serde_json::json!({ "error": message }))
}

pub fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| {
            let mut fallback = Response::new(Body::from("internal error"));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
}

/// Header value marking canary-bound forwards.
pub fn canary_env_value() -> http::HeaderValue {
    http::HeaderValue::from_static(CANARY_ENV)
}
