//! Configuration file loading.
//!
//! Format is selected by file extension (YAML is the default). The
//! `GATEWAY_CONFIG_PATH` environment variable, when set, overrides whatever
//! path the caller supplies so deployments can relocate the file without
//! touching the unit definition.
use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Environment override for the configuration file location.
pub const CONFIG_PATH_ENV: &str = "GATEWAY_CONFIG_PATH";

/// Resolve the effective config path, honoring the environment override.
pub fn resolve_config_path(cli_path: &str) -> String {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.is_empty() => {
            tracing::info!(path = %path, "using {CONFIG_PATH_ENV} override");
            path
        }
        _ => cli_path.to_string(),
    }
}

/// Load configuration from a file, picking the parser by extension.
pub fn load_config(config_path: &str) -> Result<GatewayConfig> {
    let path = Path::new(config_path);

    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            path.to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to read config from {}", path.display()))?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))?;

    Ok(gateway_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::models::{BalancerKind, RateLimitAlgorithm, RouteEngine};

    #[test]
    fn load_yaml_config() {
        let yaml = r#"
server:
  port: 9000
routing:
  engine: trie_regexp
  load_balancer: weighted_round_robin
  rules:
    "/api/v1/user":
      - target: "http://127.0.0.1:8081"
        weight: 80
      - target: "http://127.0.0.1:8082"
        weight: 20
        env: canary
traffic:
  rate_limit:
    qps: 5
    burst: 5
    algorithm: leaky_bucket
"#;
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(file, "{yaml}").unwrap();

        let cfg = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.routing.engine, RouteEngine::TrieRegexp);
        assert_eq!(cfg.routing.load_balancer, BalancerKind::WeightedRoundRobin);
        let rules = &cfg.routing.rules["/api/v1/user"];
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].weight, 80);
        assert!(rules[1].is_canary());
        assert_eq!(cfg.traffic.rate_limit.algorithm, RateLimitAlgorithm::LeakyBucket);
    }

    #[test]
    fn rule_order_is_preserved() {
        let yaml = r#"
routing:
  rules:
    "/z": [{ target: "http://one:1" }]
    "/a": [{ target: "http://two:2" }]
    "/m": [{ target: "http://three:3" }]
"#;
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(file, "{yaml}").unwrap();

        let cfg = load_config(file.path().to_str().unwrap()).unwrap();
        let order: Vec<&str> = cfg.routing.rules.keys().map(String::as_str).collect();
        assert_eq!(order, vec!["/z", "/a", "/m"]);
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let yaml = r#"
traffic:
  rate_limit:
    algorithm: sliding_log
"#;
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(file, "{yaml}").unwrap();

        assert!(load_config(file.path().to_str().unwrap()).is_err());
    }
}
