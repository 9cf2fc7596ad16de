//! IP access-control checks.
use std::sync::Arc;

use crate::config::models::{IpUpdateMode, SecurityConfig};
use crate::ports::acl_store::{AclList, AclStore};

/// Verdict of an ACL check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclVerdict {
    Allowed,
    DeniedByWhitelist,
    DeniedByBlacklist,
}

impl AclVerdict {
    pub fn is_denied(&self) -> bool {
        !matches!(self, AclVerdict::Allowed)
    }
}

/// IP ACL evaluator backed by a pluggable store.
///
/// When a whitelist is configured it has priority: membership admits, and
/// every other address is denied. Otherwise the blacklist denies members
/// and admits the rest.
pub struct IpAcl {
    store: Arc<dyn AclStore>,
    whitelist_active: bool,
    blacklist_active: bool,
}

impl IpAcl {
    pub fn new(store: Arc<dyn AclStore>, config: &SecurityConfig) -> Self {
        Self {
            store,
            whitelist_active: !config.ip_whitelist.is_empty(),
            blacklist_active: !config.ip_blacklist.is_empty(),
        }
    }

    /// Seed the store from the configuration lists. `override` clears the
    /// store first; `append` adds on top of whatever is there.
    pub async fn seed(store: &dyn AclStore, config: &SecurityConfig) {
        if config.ip_update_mode == IpUpdateMode::Override {
            store.clear().await;
            tracing::info!("existing IP rules cleared in override mode");
        }
        if !config.ip_whitelist.is_empty() {
            store.seed(AclList::Whitelist, &config.ip_whitelist).await;
            tracing::info!(count = config.ip_whitelist.len(), "IP whitelist seeded");
        }
        if !config.ip_blacklist.is_empty() {
            store.seed(AclList::Blacklist, &config.ip_blacklist).await;
            tracing::info!(count = config.ip_blacklist.len(), "IP blacklist seeded");
        }
    }

    pub async fn check(&self, client_ip: &str) -> AclVerdict {
        if self.whitelist_active {
            if self.store.is_listed(AclList::Whitelist, client_ip).await {
                return AclVerdict::Allowed;
            }
            tracing::warn!(ip = %client_ip, "IP not in whitelist");
            return AclVerdict::DeniedByWhitelist;
        }

        if self.blacklist_active && self.store.is_listed(AclList::Blacklist, client_ip).await {
            tracing::warn!(ip = %client_ip, "IP blocked by blacklist");
            return AclVerdict::DeniedByBlacklist;
        }

        AclVerdict::Allowed
    }
}
