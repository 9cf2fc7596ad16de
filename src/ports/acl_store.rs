//! IP access-list storage capability.
//!
//! The production deployment backs this with an external key/value store
//! (see `cache.*` in the configuration); the gateway itself only needs
//! membership checks and seeding.
use async_trait::async_trait;

/// Which access list an operation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclList {
    Whitelist,
    Blacklist,
}

/// Port for IP access-list membership and seeding.
#[async_trait]
pub trait AclStore: Send + Sync + 'static {
    /// Is `ip` a member of `list`? Lookup errors are logged by the
    /// implementation and reported as `false`.
    async fn is_listed(&self, list: AclList, ip: &str) -> bool;

    /// Remove every entry from both lists.
    async fn clear(&self);

    /// Add `ips` to `list`.
    async fn seed(&self, list: AclList, ips: &[String]);
}
