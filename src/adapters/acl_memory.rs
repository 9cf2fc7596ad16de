//! In-memory ACL store.
//!
//! Process-local stand-in for the external key/value store the ACL port
//! abstracts. Holds both lists in concurrent sets; contents live and die
//! with the process.
use async_trait::async_trait;
use scc::HashSet;

use crate::ports::acl_store::{AclList, AclStore};

#[derive(Default)]
pub struct MemoryAclStore {
    whitelist: HashSet<String>,
    blacklist: HashSet<String>,
}

impl MemoryAclStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_for(&self, list: AclList) -> &HashSet<String> {
        match list {
            AclList::Whitelist => &self.whitelist,
            AclList::Blacklist => &self.blacklist,
        }
    }
}

#[async_trait]
impl AclStore for MemoryAclStore {
    async fn is_listed(&self, list: AclList, ip: &str) -> bool {
        self.set_for(list).contains_async(&ip.to_string()).await
    }

    async fn clear(&self) {
        self.whitelist.clear_async().await;
        self.blacklist.clear_async().await;
    }

    async fn seed(&self, list: AclList, ips: &[String]) {
        let set = self.set_for(list);
        for ip in ips {
            let _ = set.insert_async(ip.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seed_and_lookup() {
        let store = MemoryAclStore::new();
        store
            .seed(AclList::Blacklist, &["10.0.0.9".to_string()])
            .await;

        assert!(store.is_listed(AclList::Blacklist, "10.0.0.9").await);
        assert!(!store.is_listed(AclList::Blacklist, "10.0.0.8").await);
        assert!(!store.is_listed(AclList::Whitelist, "10.0.0.9").await);
    }

    #[tokio::test]
    async fn clear_empties_both_lists() {
        let store = MemoryAclStore::new();
        store.seed(AclList::Whitelist, &["1.1.1.1".to_string()]).await;
        store.seed(AclList::Blacklist, &["2.2.2.2".to_string()]).await;
        store.clear().await;

        assert!(!store.is_listed(AclList::Whitelist, "1.1.1.1").await);
        assert!(!store.is_listed(AclList::Blacklist, "2.2.2.2").await);
    }
}
