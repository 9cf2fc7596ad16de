//! Static-table policy engine.
//!
//! Minimal RBAC evaluation over the `security.rbac.policies` table: a
//! subject may access paths under any of its configured prefixes. A real
//! deployment swaps this for an external policy service behind the same
//! port.
use async_trait::async_trait;

use crate::config::models::RbacConfig;
use crate::ports::auth::PolicyEngine;

pub struct StaticPolicyEngine {
    policies: Vec<(String, String)>,
}

impl StaticPolicyEngine {
    pub fn new(config: &RbacConfig) -> Self {
        Self {
            policies: config
                .policies
                .iter()
                .map(|p| (p.subject.clone(), p.path_prefix.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl PolicyEngine for StaticPolicyEngine {
    async fn allow(&self, subject: &str, path: &str) -> bool {
        self.policies
            .iter()
            .any(|(s, prefix)| s == subject && path.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::PolicyRule;

    #[tokio::test]
    async fn subject_is_scoped_to_its_prefixes() {
        let engine = StaticPolicyEngine::new(&RbacConfig {
            enabled: true,
            policies: vec![
                PolicyRule {
                    subject: "admin".to_string(),
                    path_prefix: "/".to_string(),
                },
                PolicyRule {
                    subject: "reader".to_string(),
                    path_prefix: "/api/v1/user".to_string(),
                },
            ],
        });

        assert!(engine.allow("admin", "/api/v1/order").await);
        assert!(engine.allow("reader", "/api/v1/user/42").await);
        assert!(!engine.allow("reader", "/api/v1/order").await);
        assert!(!engine.allow("ghost", "/api/v1/user").await);
    }
}
