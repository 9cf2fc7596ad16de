//! Myelin - an HTTP-fronted API gateway.
//!
//! Myelin terminates client requests, authorizes and shapes traffic,
//! resolves each request to a backend group, selects one backend via a
//! pluggable load-balancing policy, and proxies the request over HTTP,
//! WebSocket or gRPC. Configuration is hot-reloadable: routing rules, the
//! load-balancer choice and middleware toggles change at runtime without
//! dropping in-flight connections.
//!
//! # Features
//! - Route matching via a character trie, anchored regexes, a hybrid of
//!   the two, or host-framework longest-prefix matching
//! - Load balancing: round-robin, weighted round-robin, Ketama consistent
//!   hashing, Consul-backed snapshots
//! - Admission control: token-bucket or leaky-bucket, selected by config
//! - Per-route circuit breaking over a time-sliding outcome window
//! - Periodic HTTP / gRPC / WebSocket liveness probes with per-target
//!   counters
//! - Canary traffic steering by the `X-Env` request header
//! - Structured logging via `tracing`, Prometheus-style metrics
//!
//! # Architecture
//! The crate separates **ports** (capability traits) from **adapters**
//! (implementations) and keeps the request-plane logic inside `core`. The
//! composition root (`main.rs`) builds one [`adapters::RequestPipeline`]
//! per configuration snapshot and swaps it atomically on reload.
//!
//! # Quick example
//! ```no_run
//! use std::sync::Arc;
//!
//! use myelin::adapters::{
//!     GatewayApp, HttpClientAdapter, MemoryAclStore, ProtocolProber, RequestPipeline,
//! };
//! use myelin::core::health::HealthChecker;
//!
//! # fn main() -> eyre::Result<()> {
//! # let rt = tokio::runtime::Runtime::new()?;
//! # rt.block_on(async {
//! let config = Arc::new(myelin::config::load_config("gateway.yaml")?);
//! myelin::config::validate(&config)?;
//!
//! let http_client = Arc::new(HttpClientAdapter::new(&config.performance));
//! let prober = Arc::new(ProtocolProber::new(http_client.clone()));
//! let health = HealthChecker::new(&config, prober);
//! let pipeline = Arc::new(RequestPipeline::build(
//!     config,
//!     http_client,
//!     health,
//!     Arc::new(MemoryAclStore::new()),
//!     None,
//!     None,
//! ));
//! let app = GatewayApp::new(pipeline);
//! let router = app.router();
//! # eyre::Ok(())
//! # })?;
//! # Ok(())
//! # }
//! ```
//!
//! # Error handling
//! Fallible APIs return `eyre::Result` with context attached, or a domain
//! error type where callers match on variants.
pub mod adapters;
pub mod config;
pub mod core;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub use crate::adapters::{GatewayApp, RequestPipeline};
pub use crate::config::models::GatewayConfig;
pub use crate::core::GatewayService;
pub use crate::utils::GracefulShutdown;
