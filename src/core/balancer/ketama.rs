//! Ketama consistent-hash policy.
use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::models::BalancerKind;
use crate::core::balancer::{LoadBalancer, SelectionContext};

/// Virtual nodes placed on the ring per target.
pub const DEFAULT_REPLICAS: usize = 100;

#[derive(Default)]
struct Ring {
    nodes: Vec<String>,
    hashes: Vec<u32>,
    targets_by_hash: HashMap<u32, String>,
}

/// Consistent hashing over a sorted ring of virtual nodes.
///
/// Each target contributes `replicas` entries hashed as `"{target}-{j}"`;
/// the request key is the client address. Lookup binary-searches the first
/// ring hash >= key, wrapping to index 0 past the end. The ring is rebuilt
/// (double-checked under the write lock) whenever the candidate set changes.
pub struct KetamaBalancer {
    replicas: usize,
    ring: RwLock<Ring>,
}

impl KetamaBalancer {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas: replicas.max(1),
            ring: RwLock::new(Ring::default()),
        }
    }

    /// First four bytes of the MD5 digest, big-endian.
    fn hash(key: &str) -> u32 {
        let digest = md5::compute(key.as_bytes());
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    fn rebuild(&self, ring: &mut Ring, targets: &[String]) {
        ring.nodes = targets.to_vec();
        ring.targets_by_hash = HashMap::with_capacity(targets.len() * self.replicas);
        ring.hashes = Vec::with_capacity(targets.len() * self.replicas);

        for target in targets {
            for j in 0..self.replicas {
                let hash = Self::hash(&format!("{target}-{j}"));
                ring.hashes.push(hash);
                ring.targets_by_hash.insert(hash, target.clone());
            }
        }
        ring.hashes.sort_unstable();
        tracing::debug!(
            targets = targets.len(),
            slots = ring.hashes.len(),
            "ketama ring rebuilt"
        );
    }

    fn find_nearest(hashes: &[u32], key: u32) -> usize {
        match hashes.binary_search(&key) {
            Ok(index) => index,
            // Wrap to the first slot past the highest hash.
            Err(index) if index == hashes.len() => 0,
            Err(index) => index,
        }
    }
}

impl LoadBalancer for KetamaBalancer {
    fn select_target(&self, candidates: &[String], ctx: &SelectionContext) -> Option<String> {
        if candidates.is_empty() {
            return None;
        }

        let needs_rebuild = {
            let ring = match self.ring.read() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            ring.nodes != candidates
        };

        if needs_rebuild {
            let mut ring = match self.ring.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            // Double-check: another writer may have rebuilt while we waited.
            if ring.nodes != candidates {
                self.rebuild(&mut ring, candidates);
            }
        }

        let ring = match self.ring.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if ring.hashes.is_empty() {
            return candidates.first().cloned();
        }

        let key = Self::hash(&ctx.client_addr);
        let index = Self::find_nearest(&ring.hashes, key);
        ring.targets_by_hash.get(&ring.hashes[index]).cloned()
    }

    fn kind(&self) -> BalancerKind {
        BalancerKind::Ketama
    }

    fn active_targets(&self) -> Vec<String> {
        let ring = match self.ring.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        ring.nodes.clone()
    }
}
