use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use myelin::adapters::{
    FileConfigProvider, GatewayApp, HttpClientAdapter, JwtAuthority, MemoryAclStore,
    ProtocolProber, RequestPipeline, StaticPolicyEngine,
};
use myelin::config::models::{AuthMode, GatewayConfig, RunMode};
use myelin::config::{load_config, resolve_config_path, validate};
use myelin::core::health::HealthChecker;
use myelin::core::security::IpAcl;
use myelin::ports::auth::{PolicyEngine, TokenAuthority};
use myelin::ports::config_provider::ConfigProvider;
use myelin::ports::http_client::HttpClient;
use myelin::utils::GracefulShutdown;
use myelin::{metrics, tracing_setup};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (GATEWAY_CONFIG_PATH overrides this).
    #[clap(short, long, default_value = "gateway.yaml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate a configuration file and exit.
    Validate {
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
    /// Write a starter configuration file.
    Init {
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
    /// Run the gateway (default).
    Serve {
        #[clap(short, long, default_value = "gateway.yaml")]
        config: String,
    },
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let (command, config_path) = match args.command {
        Some(Commands::Validate { config }) => ("validate", config),
        Some(Commands::Init { config }) => ("init", config),
        Some(Commands::Serve { config }) => ("serve", config),
        None => ("serve", args.config),
    };
    let config_path = resolve_config_path(&config_path);

    match command {
        "validate" => return validate_command(&config_path),
        "init" => return init_command(&config_path),
        _ => {}
    }

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration from {config_path}: {err:#}");
            std::process::exit(1);
        }
    };

    match config.server.mode {
        RunMode::Debug => tracing_setup::init_console_tracing()?,
        RunMode::Release => tracing_setup::init_tracing()?,
    }

    if let Err(err) = validate(&config) {
        tracing::error!(error = %err, "fatal configuration error");
        std::process::exit(1);
    }

    if let Err(err) = metrics::init_metrics() {
        tracing::error!(error = %err, "failed to initialize metrics");
        std::process::exit(1);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    runtime.block_on(serve(config_path, config))
}

/// Build the per-snapshot auth components.
fn build_auth(
    config: &GatewayConfig,
) -> (Option<Arc<dyn TokenAuthority>>, Option<Arc<dyn PolicyEngine>>) {
    match config.security.auth_mode {
        AuthMode::None => (None, None),
        AuthMode::Jwt => (
            Some(Arc::new(JwtAuthority::new(&config.security.jwt)) as Arc<dyn TokenAuthority>),
            None,
        ),
        AuthMode::Rbac => (
            Some(Arc::new(JwtAuthority::new(&config.security.jwt)) as Arc<dyn TokenAuthority>),
            Some(Arc::new(StaticPolicyEngine::new(&config.security.rbac))
                as Arc<dyn PolicyEngine>),
        ),
    }
}

async fn serve(config_path: String, config: GatewayConfig) -> Result<()> {
    let config = Arc::new(config);
    let port = config.server.port;

    tracing::info!(
        port,
        engine = config.routing.engine.as_str(),
        load_balancer = config.routing.load_balancer.as_str(),
        auth_mode = ?config.security.auth_mode,
        rules = config.routing.rules.len(),
        "starting myelin gateway"
    );
    tracing::info!(
        rate_limit = config.middleware.rate_limit,
        ip_acl = config.middleware.ip_acl,
        anti_injection = config.middleware.anti_injection,
        auth = config.middleware.auth,
        breaker = config.middleware.breaker,
        tracing = config.middleware.tracing,
        "middleware toggles"
    );

    // Shared long-lived components.
    let http_client: Arc<dyn HttpClient> =
        Arc::new(HttpClientAdapter::new(&config.performance));
    let prober = Arc::new(ProtocolProber::new(http_client.clone()));
    let health = HealthChecker::new(&config, prober);
    let acl_store = Arc::new(MemoryAclStore::new());
    IpAcl::seed(acl_store.as_ref(), &config.security).await;

    let health_task = tokio::spawn(health.clone().run());

    // Initial pipeline.
    let (token_authority, policy_engine) = build_auth(&config);
    let pipeline = Arc::new(RequestPipeline::build(
        config.clone(),
        http_client.clone(),
        health.clone(),
        acl_store.clone(),
        token_authority,
        policy_engine,
    ));
    let app = GatewayApp::new(pipeline);

    // Hot-reload controller: on a config change, rebuild the pipeline
    // (middleware chain + protocol handlers + balancer), swap it in, then
    // refresh the health checker's target set. Bad snapshots are rejected
    // and the active one stays.
    let provider: Arc<dyn ConfigProvider> = Arc::new(
        FileConfigProvider::new(&config_path)
            .with_context(|| format!("failed to watch config at {config_path}"))?,
    );
    let mut change_rx = provider.watch();
    {
        let app = app.clone();
        let http_client = http_client.clone();
        let health = health.clone();
        let acl_store = acl_store.clone();
        let provider = provider.clone();
        let debounce = Duration::from_secs(2);
        tokio::spawn(async move {
            let now = tokio::time::Instant::now();
            let mut last_reload = now.checked_sub(debounce).unwrap_or(now);
            while change_rx.recv().await.is_some() {
                if last_reload.elapsed() < debounce {
                    while change_rx.try_recv().is_ok() {}
                    continue;
                }
                last_reload = tokio::time::Instant::now();

                tracing::info!("configuration change detected, reloading");
                let new_config = match provider.load_config().await {
                    Ok(config) => Arc::new(config),
                    Err(err) => {
                        tracing::error!(error = %err, "reload failed, keeping active configuration");
                        continue;
                    }
                };
                if let Err(err) = validate(&new_config) {
                    tracing::error!(error = %err, "invalid configuration, keeping active one");
                    continue;
                }

                IpAcl::seed(acl_store.as_ref(), &new_config.security).await;
                let (token_authority, policy_engine) = build_auth(&new_config);
                let new_pipeline = Arc::new(RequestPipeline::build(
                    new_config.clone(),
                    http_client.clone(),
                    health.clone(),
                    acl_store.clone(),
                    token_authority,
                    policy_engine,
                ));

                let old = app.swap_pipeline(new_pipeline.clone());
                new_pipeline
                    .gateway()
                    .refresh_load_balancer(&new_config, http_client.clone());
                health.refresh_targets(&new_config);
                old.teardown();

                tracing::info!("configuration reloaded");
                while change_rx.try_recv().is_ok() {}
            }
        });
    }

    // Signal handling.
    let shutdown = Arc::new(GracefulShutdown::new());
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = shutdown.run_signal_handler().await {
                tracing::error!(error = %err, "signal handler error");
            }
        });
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "listening");

    let router = app.router();
    let shutdown_wait = shutdown.clone();
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_wait.wait().await;
    })
    .await
    .context("server error")?;

    // In-flight requests drained; stop background lifecycles in order.
    tracing::info!("shutting down");
    health.shutdown();
    health_task.abort();
    app.pipeline().teardown();
    tracing::info!("shutdown complete");
    Ok(())
}

fn validate_command(config_path: &str) -> Result<()> {
    println!("validating configuration: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("error: configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path) {
        Ok(config) => {
            println!("  parsing: ok");
            config
        }
        Err(err) => {
            eprintln!("  parsing failed: {err:#}");
            std::process::exit(1);
        }
    };

    match validate(&config) {
        Ok(()) => {
            println!("  validation: ok");
            println!("  port: {}", config.server.port);
            println!("  engine: {}", config.routing.engine.as_str());
            println!("  load balancer: {}", config.routing.load_balancer.as_str());
            println!("  rules: {}", config.routing.rules.len());
            Ok(())
        }
        Err(err) => {
            eprintln!("  validation failed: {err}");
            std::process::exit(1);
        }
    }
}

fn init_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("error: configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let starter = r#"# Myelin gateway configuration

server:
  port: 8080
  mode: release

routing:
  engine: trie_regexp
  load_balancer: weighted_round_robin
  heartbeat_interval_secs: 30
  rules:
    "/api/v1/user":
      - target: "http://127.0.0.1:8081"
        weight: 80
        env: stable
      - target: "http://127.0.0.1:8082"
        weight: 20
        env: canary

middleware:
  rate_limit: true
  ip_acl: false
  anti_injection: true
  auth: false
  breaker: true
  tracing: false

traffic:
  rate_limit:
    enabled: true
    qps: 1000
    burst: 2000
    algorithm: token_bucket
  breaker:
    enabled: true
    error_rate: 0.5
    timeout_ms: 1000
    min_requests: 20
    sleep_window_ms: 5000
    max_concurrent: 100
    window_duration_secs: 10

observability:
  prometheus:
    enabled: true
    path: /metrics
"#;

    std::fs::write(path, starter).context("failed to write configuration file")?;
    println!("created starter configuration at {config_path}");
    println!("run 'myelin serve --config {config_path}' to start the gateway");
    Ok(())
}
