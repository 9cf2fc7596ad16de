//! HTTP-to-gRPC bridging.
//!
//! The bridge is a registry of `mount path -> (target, channel)` entries,
//! one per grpc-protocol rule, with no compiled service coupling: requests
//! under `mount/*` are forwarded as unary calls to `/{Service}/{Method}`
//! derived from the remaining path segments, with the HTTP body carried
//! verbatim as the protobuf message bytes. Upstream status codes map to
//! HTTP through the standard gateway table.
use axum::body::Body;
use bytes::{Buf, BufMut, Bytes};
use http::{header::HeaderName, Response, StatusCode};
use http_body_util::BodyExt;
use indexmap::IndexMap;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};

use crate::config::models::{GatewayConfig, Protocol};

pub const PROXY_TYPE_HEADER: &str = "x-proxy-type";
pub const PROXY_TYPE_VALUE: &str = "grpc-gateway";
pub const POWERED_BY_HEADER: &str = "x-powered-by";
pub const POWERED_BY_VALUE: &str = "myelin";

struct GrpcRoute {
    target: String,
    channel: Channel,
}

/// Registry of bridged mounts. Rebuilt wholesale on reload.
pub struct GrpcBridge {
    routes: IndexMap<String, GrpcRoute>,
}

impl GrpcBridge {
    /// Build one lazily-connecting channel per grpc rule. Rules whose
    /// target does not parse are logged and skipped.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut routes = IndexMap::new();
        for (path, rules) in &config.routing.rules {
            for rule in rules {
                if rule.protocol != Protocol::Grpc {
                    continue;
                }
                let endpoint = match Endpoint::from_shared(format!("http://{}", rule.target)) {
                    Ok(endpoint) => endpoint,
                    Err(err) => {
                        tracing::error!(target = %rule.target, error = %err,
                            "invalid grpc target, skipping bridge mount");
                        continue;
                    }
                };
                let channel = endpoint.connect_lazy();
                let mount = crate::core::router::normalize_path(path).to_string();
                tracing::info!(path = %path, target = %rule.target, "grpc bridge mounted");
                routes.insert(
                    mount,
                    GrpcRoute {
                        target: rule.target.clone(),
                        channel,
                    },
                );
            }
        }
        Self { routes }
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the mount serving `path` and return the `/Service/Method`
    /// remainder.
    fn match_route<'a>(&self, path: &'a str) -> Option<(&GrpcRoute, &'a str)> {
        let normalized = path.strip_prefix('/').unwrap_or(path);
        for (mount, route) in &self.routes {
            if let Some(rest) = normalized.strip_prefix(mount.as_str()) {
                if let Some(rest) = rest.strip_prefix('/') {
                    if !rest.is_empty() {
                        return Some((route, rest));
                    }
                }
            }
        }
        None
    }

    /// Whether `path` falls under a bridged mount.
    pub fn serves(&self, path: &str) -> bool {
        self.match_route(path).is_some()
    }

    /// Forward one HTTP request as a unary gRPC call.
    pub async fn forward(&self, path: &str, body: Bytes) -> Response<Body> {
        let (route, rest) = match self.match_route(path) {
            Some(matched) => matched,
            None => {
                return error_response(StatusCode::NOT_FOUND, "no grpc mount for path");
            }
        };

        let mut segments = rest.split('/').filter(|s| !s.is_empty());
        let (service, method) = match (segments.next(), segments.next()) {
            (Some(service), Some(method)) => (service, method),
            _ => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "grpc path must be <mount>/<Service>/<Method>",
                );
            }
        };

        let rpc_path = match format!("/{service}/{method}").parse::<http::uri::PathAndQuery>() {
            Ok(p) => p,
            Err(_) => {
                return error_response(StatusCode::BAD_REQUEST, "invalid grpc method path");
            }
        };

        let mut grpc = tonic::client::Grpc::new(route.channel.clone());
        if let Err(err) = grpc.ready().await {
            tracing::error!(target = %route.target, error = %err, "grpc channel not ready");
            return grpc_error_response(&Status::unavailable(err.to_string()));
        }

        match grpc
            .unary(tonic::Request::new(body), rpc_path, PassthroughCodec)
            .await
        {
            Ok(response) => {
                let payload: Bytes = response.into_inner();
                Response::builder()
                    .status(StatusCode::OK)
                    .header(
                        HeaderName::from_static(PROXY_TYPE_HEADER),
                        PROXY_TYPE_VALUE,
                    )
                    .header(
                        HeaderName::from_static(POWERED_BY_HEADER),
                        POWERED_BY_VALUE,
                    )
                    .header(http::header::CONTENT_TYPE, "application/octet-stream")
                    .body(Body::from(payload))
                    .unwrap_or_else(|_| fallback_response())
            }
            Err(status) => {
                tracing::warn!(target = %route.target, code = ?status.code(),
                    "grpc upstream returned error status");
                grpc_error_response(&status)
            }
        }
    }

    /// Drain the axum body and forward. Convenience for the handler.
    pub async fn forward_request(&self, path: &str, body: Body) -> Response<Body> {
        match body.collect().await {
            Ok(collected) => self.forward(path, collected.to_bytes()).await,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read request body for grpc bridge");
                error_response(StatusCode::BAD_REQUEST, "unreadable request body")
            }
        }
    }
}

/// Default status translation used by gRPC HTTP gateways.
pub fn grpc_code_to_http(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Code::InvalidArgument | Code::FailedPrecondition | Code::OutOfRange => {
            StatusCode::BAD_REQUEST
        }
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists | Code::Aborted => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::Unknown | Code::Internal | Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn grpc_error_response(status: &Status) -> Response<Body> {
    let http_status = grpc_code_to_http(status.code());
    let body = serde_json::json!({
        "error": status.message(),
        "code": format!("{:?}", status.code()),
    });
    Response::builder()
        .status(http_status)
        .header(HeaderName::from_static(PROXY_TYPE_HEADER), PROXY_TYPE_VALUE)
        .header(HeaderName::from_static(POWERED_BY_HEADER), POWERED_BY_VALUE)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| fallback_response())
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let body = serde_json::json!({ "error": message });
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| fallback_response())
}

fn fallback_response() -> Response<Body> {
    let mut response = Response::new(Body::from("internal error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

/// Codec that hands message bytes through untouched in both directions.
#[derive(Debug, Clone, Copy, Default)]
struct PassthroughCodec;

impl Codec for PassthroughCodec {
    type Encode = Bytes;
    type Decode = Bytes;
    type Encoder = PassthroughEncoder;
    type Decoder = PassthroughDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        PassthroughEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        PassthroughDecoder
    }
}

#[derive(Debug)]
struct PassthroughEncoder;

impl Encoder for PassthroughEncoder {
    type Item = Bytes;
    type Error = Status;

    fn encode(&mut self, item: Bytes, dst: &mut EncodeBuf<'_>) -> Result<(), Status> {
        dst.put(item);
        Ok(())
    }
}

#[derive(Debug)]
struct PassthroughDecoder;

impl Decoder for PassthroughDecoder {
    type Item = Bytes;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Bytes>, Status> {
        let remaining = src.remaining();
        Ok(Some(src.copy_to_bytes(remaining)))
    }
}
