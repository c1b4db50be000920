//! `TopologyManager`: the BucketTable and the current Ring, kept in
//! sync under one reader/writer lock.

use crate::bucket::BucketTable;
use corelib::membership::{Membership, MembershipDiff};
use corelib::node::NodeId;
use corelib::ring::Ring;
use corelib::vnode::VNode;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

pub struct TopologyManager {
    local_node_id: NodeId,
    table: BucketTable,
    ring: RwLock<Ring>,
}

impl TopologyManager {
    pub fn new(local_node_id: NodeId, local_incarnation: Arc<AtomicU64>) -> Self {
        Self {
            table: BucketTable::new(local_node_id.clone(), local_incarnation),
            local_node_id,
            ring: RwLock::new(Ring::new()),
        }
    }

    pub fn local_node_id(&self) -> &NodeId {
        &self.local_node_id
    }

    /// Local-origin membership update: bumps the bucket table and adds
    /// this node's vnodes to the ring.
    pub fn add_membership(&self, m: Membership) {
        let vnodes = VNode::from_tokens(&m.node_id, &m.tokens);
        self.table.add_or_update(m);
        let mut ring = self.ring.write();
        *ring = ring.add_vnodes(vnodes);
    }

    /// Incoming `gossip/bucket` merge: `remote_members` must already
    /// exclude the local node_id.
    pub fn apply_bucket(&self, bucket_id: u32, remote_members: Vec<Membership>) -> MembershipDiff {
        let filtered: Vec<Membership> = remote_members
            .into_iter()
            .filter(|m| m.node_id != self.local_node_id)
            .collect();
        let diff = self.table.merge_bucket(bucket_id, &filtered);
        if diff.is_empty() {
            return diff;
        }

        let by_id: HashMap<&NodeId, &Membership> =
            filtered.iter().map(|m| (&m.node_id, m)).collect();

        let mut removed_ids: HashSet<NodeId> = diff.removed.iter().cloned().collect();
        for node_id in &diff.updated {
            removed_ids.insert(node_id.clone());
        }

        let mut ring = self.ring.write();
        if !removed_ids.is_empty() {
            *ring = ring.drop_nodes(&removed_ids);
        }
        let mut new_vnodes = Vec::new();
        for node_id in diff.added.iter().chain(diff.updated.iter()) {
            if let Some(m) = by_id.get(node_id) {
                new_vnodes.extend(VNode::from_tokens(node_id, &m.tokens));
            }
        }
        if !new_vnodes.is_empty() {
            *ring = ring.add_vnodes(new_vnodes);
        }

        diff
    }

    /// Persists the draining membership (so peers converge on it) but
    /// removes its vnodes from the ring immediately; no automatic key
    /// handoff is performed.
    pub fn drain_membership(&self, m: Membership) {
        let node_id = m.node_id.clone();
        self.table.add_or_update(m);
        let mut ids = HashSet::new();
        ids.insert(node_id);
        let mut ring = self.ring.write();
        *ring = ring.drop_nodes(&ids);
    }

    /// Rebuilds the table and ring from scratch (bootstrap), skipping
    /// the local node_id.
    pub fn restore(&self, members: Vec<Membership>) {
        let mut all_vnodes = Vec::new();
        for m in members {
            if m.node_id == self.local_node_id {
                continue;
            }
            all_vnodes.extend(VNode::from_tokens(&m.node_id, &m.tokens));
            self.table.add_or_update(m);
        }
        *self.ring.write() = Ring::from_vnodes(all_vnodes);
    }

    pub fn get_ring(&self) -> Ring {
        self.ring.read().clone()
    }

    pub fn get_checksums(&self) -> HashMap<u32, u32> {
        self.table.get_checksums()
    }

    pub fn get_bucket_memberships(&self, bucket_id: u32) -> Vec<Membership> {
        self.table.get_bucket_memberships(bucket_id)
    }

    pub fn pick_random_membership(&self) -> Option<NodeId> {
        self.table.pick_random_member()
    }

    pub fn get_membership(&self, node_id: &NodeId) -> Option<Membership> {
        self.table.get_membership(node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::node::{NodePhase, NodeSize};
    use corelib::token::Token;
    use std::sync::atomic::AtomicU64;

    fn membership(id: &str, tokens: Vec<Token>) -> Membership {
        Membership {
            node_id: NodeId::new(id),
            address: "127.0.0.1:9000".into(),
            size: NodeSize::M,
            phase: NodePhase::Ready,
            epoch: 0,
            incarnation: 1,
            tokens,
        }
    }

    fn manager(local: &str) -> TopologyManager {
        TopologyManager::new(NodeId::new(local), Arc::new(AtomicU64::new(0)))
    }

    #[test]
    fn add_membership_updates_ring() {
        let tm = manager("self");
        tm.add_membership(membership("a", vec![Token(10), Token(20)]));
        assert_eq!(tm.get_ring().token_count(), 2);
        assert_eq!(tm.get_ring().node_count(), 1);
    }

    #[test]
    fn apply_bucket_adds_new_members_to_ring() {
        let tm = manager("self");
        let m = membership("a", vec![Token(10)]);
        let bucket_id = crate::bucket::bucket_for(&NodeId::new("a"), crate::bucket::DEFAULT_BUCKET_COUNT);
        let diff = tm.apply_bucket(bucket_id, vec![m]);
        assert_eq!(diff.added, vec![NodeId::new("a")]);
        assert_eq!(tm.get_ring().token_count(), 1);
    }

    #[test]
    fn apply_bucket_filters_local_node_id() {
        let tm = manager("self");
        let bucket_id =
            crate::bucket::bucket_for(&NodeId::new("self"), crate::bucket::DEFAULT_BUCKET_COUNT);
        let diff = tm.apply_bucket(bucket_id, vec![membership("self", vec![Token(1)])]);
        assert!(diff.is_empty());
        assert_eq!(tm.get_ring().token_count(), 0);
    }

    #[test]
    fn drain_membership_removes_vnodes_but_keeps_table_entry() {
        let tm = manager("self");
        tm.add_membership(membership("a", vec![Token(10)]));
        let mut draining = membership("a", vec![Token(10)]);
        draining.phase = NodePhase::Draining;
        tm.drain_membership(draining);

        assert_eq!(tm.get_ring().token_count(), 0);
        let bucket_id = crate::bucket::bucket_for(&NodeId::new("a"), crate::bucket::DEFAULT_BUCKET_COUNT);
        assert_eq!(tm.get_bucket_memberships(bucket_id).len(), 1);
    }

    #[test]
    fn restore_skips_local_node_id() {
        let tm = manager("self");
        tm.restore(vec![
            membership("self", vec![Token(1)]),
            membership("a", vec![Token(2)]),
        ]);
        assert_eq!(tm.get_ring().node_count(), 1);
        assert_eq!(tm.get_ring().token_count(), 1);
    }
}
