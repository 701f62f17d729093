//! Replica-set placement policy.
//!
//! When a new segment is created, the store asks the placement policy which
//! nodes should hold its replicas. The default policy prefers the node
//! colocated with the local process (so one replica is always a local read)
//! and spreads the remaining replicas uniformly at random.

use crate::error::{StoreError, StoreResult};
use crate::node::NodeAddress;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashSet;

/// Chooses which storage nodes back a newly created segment.
///
/// Implementations must be safe to call concurrently: membership updates
/// arrive from a cluster watcher while segment creation runs on writer
/// threads.
pub trait PlacementPolicy: Send + Sync {
    /// Ingests a cluster membership change.
    ///
    /// Returns the nodes that were previously known, are no longer
    /// writable, and are not merely read-only. The caller can use the
    /// returned set to invalidate cached routing.
    fn on_cluster_changed(
        &self,
        writable: &HashSet<NodeAddress>,
        read_only: &HashSet<NodeAddress>,
    ) -> HashSet<NodeAddress>;

    /// Selects `size` distinct nodes to host a new segment's replicas.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InsufficientNodes`] if fewer than `size`
    /// non-excluded nodes are known.
    fn select_replica_set(
        &self,
        size: usize,
        excluded: &HashSet<NodeAddress>,
    ) -> StoreResult<Vec<NodeAddress>>;

    /// Picks a replacement for a failed member of an existing replica set.
    ///
    /// The whole current replica set is excluded from the choice, so the
    /// replacement is always a new node.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InsufficientNodes`] if no node outside the
    /// current replica set is known.
    fn replace_node(
        &self,
        current: &[NodeAddress],
        failed: &NodeAddress,
    ) -> StoreResult<NodeAddress>;

    /// Reorders replicas for a read. The default keeps the store's order.
    fn reorder_reads(&self, replicas: Vec<NodeAddress>) -> Vec<NodeAddress> {
        replicas
    }
}

/// Placement policy that puts the local node first and randomizes the rest.
pub struct PreferLocalPlacement {
    /// Address of the storage node colocated with this process, if any.
    local: Option<NodeAddress>,
    /// Last-known set of writable nodes.
    known: RwLock<HashSet<NodeAddress>>,
}

impl PreferLocalPlacement {
    /// Creates a policy. `local` is the address of the storage node running
    /// next to this process, or `None` when the process is not colocated
    /// with any storage node.
    #[must_use]
    pub fn new(local: Option<NodeAddress>) -> Self {
        Self {
            local,
            known: RwLock::new(HashSet::new()),
        }
    }

    /// Returns a snapshot of the currently known writable nodes.
    #[must_use]
    pub fn known_nodes(&self) -> HashSet<NodeAddress> {
        self.known.read().clone()
    }
}

impl PlacementPolicy for PreferLocalPlacement {
    fn on_cluster_changed(
        &self,
        writable: &HashSet<NodeAddress>,
        read_only: &HashSet<NodeAddress>,
    ) -> HashSet<NodeAddress> {
        let mut known = self.known.write();
        let dead = known
            .iter()
            .filter(|n| !writable.contains(*n) && !read_only.contains(*n))
            .cloned()
            .collect();
        *known = writable.clone();
        dead
    }

    fn select_replica_set(
        &self,
        size: usize,
        excluded: &HashSet<NodeAddress>,
    ) -> StoreResult<Vec<NodeAddress>> {
        if size == 0 {
            return Ok(Vec::new());
        }

        let known = self.known.read();
        let mut replicas = Vec::with_capacity(size);
        let mut remaining = size;

        let local = self
            .local
            .as_ref()
            .filter(|l| known.contains(*l) && !excluded.contains(*l));
        if let Some(local) = local {
            replicas.push(local.clone());
            remaining -= 1;
            if remaining == 0 {
                return Ok(replicas);
            }
        }

        let mut pool: Vec<NodeAddress> = known.iter().cloned().collect();
        pool.shuffle(&mut rand::thread_rng());
        for node in pool {
            if excluded.contains(&node) || Some(&node) == local {
                continue;
            }
            replicas.push(node);
            remaining -= 1;
            if remaining == 0 {
                return Ok(replicas);
            }
        }

        Err(StoreError::InsufficientNodes {
            requested: size,
            available: replicas.len(),
        })
    }

    fn replace_node(
        &self,
        current: &[NodeAddress],
        failed: &NodeAddress,
    ) -> StoreResult<NodeAddress> {
        let mut excluded: HashSet<NodeAddress> = current.iter().cloned().collect();
        excluded.insert(failed.clone());
        let mut picked = self.select_replica_set(1, &excluded)?;
        picked.pop().ok_or(StoreError::InsufficientNodes {
            requested: 1,
            available: 0,
        })
    }
}
