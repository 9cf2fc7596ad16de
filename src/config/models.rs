//! Configuration data structures for Myelin.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files.
//! They are intentionally serde-friendly and carry defaults so that minimal
//! configs remain concise. The active configuration is treated as an
//! immutable snapshot: subsystems capture an `Arc<GatewayConfig>` and
//! rebuild their internal indexes from it on every reload.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Top-level gateway configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub routing: RoutingConfig,
    pub middleware: MiddlewareConfig,
    pub traffic: TrafficConfig,
    pub security: SecurityConfig,
    pub cache: CacheConfig,
    pub consul: ConsulConfig,
    pub observability: ObservabilityConfig,
    pub performance: PerformanceConfig,
    pub websocket: WebsocketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port the inbound listener binds to.
    pub port: u16,
    /// Runtime mode; `debug` enables verbose request logging.
    pub mode: RunMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            mode: RunMode::Release,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Debug,
    Release,
}

/// A single backend rule attached to a path pattern.
///
/// `target` is a URL for `http`/`websocket` rules and a `host:port` pair for
/// `grpc` rules. Rules are immutable after creation; the active set is
/// replaced wholesale on reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub target: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub env: Option<String>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
}

fn default_weight() -> u32 {
    1
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

impl RoutingRule {
    pub fn is_canary(&self) -> bool {
        self.env.as_deref() == Some(crate::core::gateway::CANARY_ENV)
    }
}

/// Wire protocol used when forwarding to a rule's target.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Http,
    Websocket,
    Grpc,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Websocket => "websocket",
            Protocol::Grpc => "grpc",
        }
    }
}

/// Route-matching engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouteEngine {
    /// Character trie, exact matches only. Rejects regex patterns.
    Trie,
    /// Trie with an anchored-regex fallback set.
    #[default]
    TrieRegexp,
    /// Anchored regex scan in insertion order.
    Regexp,
    /// Host-framework longest-prefix matching. Rejects regex patterns.
    Prefix,
}

impl RouteEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteEngine::Trie => "trie",
            RouteEngine::TrieRegexp => "trie_regexp",
            RouteEngine::Regexp => "regexp",
            RouteEngine::Prefix => "prefix",
        }
    }

    /// Whether this engine can serve patterns containing regex metacharacters.
    pub fn supports_regex(&self) -> bool {
        matches!(self, RouteEngine::TrieRegexp | RouteEngine::Regexp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalancerKind {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    Ketama,
    Consul,
}

impl BalancerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalancerKind::RoundRobin => "round_robin",
            BalancerKind::WeightedRoundRobin => "weighted_round_robin",
            BalancerKind::Ketama => "ketama",
            BalancerKind::Consul => "consul",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Path pattern -> ordered backend rules. Insertion order is preserved
    /// and defines both regex scan order and weighted-round-robin iteration
    /// order within a path.
    pub rules: IndexMap<String, Vec<RoutingRule>>,
    pub engine: RouteEngine,
    pub load_balancer: BalancerKind,
    /// Health probe cadence in seconds.
    pub heartbeat_interval_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            rules: IndexMap::new(),
            engine: RouteEngine::default(),
            load_balancer: BalancerKind::default(),
            heartbeat_interval_secs: 30,
        }
    }
}

impl RoutingConfig {
    /// Patterns whose rule lists contain at least one rule of `protocol`,
    /// with the rule lists narrowed to that protocol.
    pub fn rules_for(&self, protocol: Protocol) -> IndexMap<String, Vec<RoutingRule>> {
        self.rules
            .iter()
            .filter_map(|(path, rules)| {
                let matched: Vec<RoutingRule> = rules
                    .iter()
                    .filter(|r| r.protocol == protocol)
                    .cloned()
                    .collect();
                if matched.is_empty() {
                    None
                } else {
                    Some((path.clone(), matched))
                }
            })
            .collect()
    }

    pub fn has_rules_for(&self, protocol: Protocol) -> bool {
        self.rules
            .values()
            .flatten()
            .any(|r| r.protocol == protocol)
    }
}

/// Per-stage middleware toggles. Stage ordering is fixed (see the request
/// pipeline); these flags only include or exclude a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareConfig {
    pub rate_limit: bool,
    pub ip_acl: bool,
    pub anti_injection: bool,
    pub auth: bool,
    pub breaker: bool,
    pub tracing: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            rate_limit: true,
            ip_acl: true,
            anti_injection: true,
            auth: true,
            breaker: true,
            tracing: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TrafficConfig {
    pub rate_limit: RateLimitConfig,
    pub breaker: BreakerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    #[default]
    TokenBucket,
    LeakyBucket,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub qps: u32,
    pub burst: u32,
    pub algorithm: RateLimitAlgorithm,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            qps: 1000,
            burst: 2000,
            algorithm: RateLimitAlgorithm::TokenBucket,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub enabled: bool,
    /// Trip threshold as a fraction in [0, 1]. Zero disables error-rate trips.
    pub error_rate: f64,
    pub timeout_ms: u64,
    /// Minimum window volume before the error rate is consulted.
    pub min_requests: u64,
    pub sleep_window_ms: u64,
    pub max_concurrent: usize,
    pub window_size: usize,
    pub window_duration_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            error_rate: 0.5,
            timeout_ms: 1000,
            min_requests: 20,
            sleep_window_ms: 5000,
            max_concurrent: 100,
            window_size: 100,
            window_duration_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    None,
    Jwt,
    Rbac,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    pub expires_in_secs: u64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expires_in_secs: 3600,
        }
    }
}

/// A single RBAC policy entry: `subject` may access paths under `path_prefix`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    pub subject: String,
    pub path_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RbacConfig {
    pub enabled: bool,
    pub policies: Vec<PolicyRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IpUpdateMode {
    #[default]
    Override,
    Append,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    pub auth_mode: AuthMode,
    pub jwt: JwtConfig,
    pub rbac: RbacConfig,
    pub ip_blacklist: Vec<String>,
    pub ip_whitelist: Vec<String>,
    pub ip_update_mode: IpUpdateMode,
}

/// External key/value store coordinates. The ACL storage implementation is a
/// pluggable capability; these fields only describe where a remote store
/// would live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub addr: String,
    pub password: String,
    pub db: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            addr: "localhost:6379".to_string(),
            password: String::new(),
            db: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsulConfig {
    pub enabled: bool,
    pub addr: String,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "127.0.0.1:8500".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub prometheus: PrometheusConfig,
    pub jaeger: JaegerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/metrics".to_string(),
        }
    }
}

/// Trace export coordinates. Span export is handled by an external
/// collector; the gateway only emits `tracing` spans when the stage is on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JaegerConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub sampler: String,
    pub sample_ratio: f64,
}

impl Default for JaegerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "127.0.0.1:4318".to_string(),
            sampler: "always".to_string(),
            sample_ratio: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPoolConfig {
    pub enabled: bool,
    pub targets_capacity: usize,
    pub rules_capacity: usize,
}

impl Default for MemoryPoolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            targets_capacity: 16,
            rules_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub memory_pool: MemoryPoolConfig,
    /// `true` selects the connection-pooled forwarding mode; `false` builds
    /// a fresh connection per forwarded request. Switching is a reload event.
    pub http_pool_enabled: bool,
    pub max_conns_per_host: usize,
    pub max_idle_conns: usize,
    pub idle_timeout_secs: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            memory_pool: MemoryPoolConfig::default(),
            http_pool_enabled: true,
            max_conns_per_host: 64,
            max_idle_conns: 32,
            idle_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsocketConfig {
    /// Mount prefix for websocket-protocol rules.
    pub prefix: String,
}

impl Default for WebsocketConfig {
    fn default() -> Self {
        Self {
            prefix: "/ws".to_string(),
        }
    }
}
