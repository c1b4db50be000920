//! Bucketed membership table: the unit of gossip exchange.
//!
//! Memberships are sharded into a fixed number of buckets by
//! `hash(node_id) mod N`. Each bucket tracks its own CRC32 checksum so
//! peers can compare cluster state cheaply before exchanging full
//! membership records.

use corelib::membership::{Membership, MembershipDiff};
use corelib::node::NodeId;
use corelib::token::Token;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const DEFAULT_BUCKET_COUNT: u32 = 128;
pub const DEFAULT_DELTA: u64 = 5;

pub fn bucket_for(node_id: &NodeId, bucket_count: u32) -> u32 {
    (Token::hash(node_id.as_str().as_bytes()).0 % bucket_count as u128) as u32
}

struct Bucket {
    members: HashMap<NodeId, Membership>,
    dirty: bool,
    cached_checksum: u32,
}

impl Bucket {
    fn new() -> Self {
        Self {
            members: HashMap::new(),
            dirty: false,
            cached_checksum: 0,
        }
    }

    fn add_or_update(&mut self, m: Membership) {
        self.members.insert(m.node_id.clone(), m);
        self.dirty = true;
    }

    fn remove(&mut self, node_id: &NodeId) -> bool {
        let removed = self.members.remove(node_id).is_some();
        if removed {
            self.dirty = true;
        }
        removed
    }

    /// Recomputes the checksum only if the bucket changed since the last
    /// call, folding CRC32 over memberships sorted by node_id so the
    /// result is independent of insertion order.
    fn checksum(&mut self) -> u32 {
        if self.dirty {
            let mut sorted: Vec<&Membership> = self.members.values().collect();
            sorted.sort_by(|a, b| a.node_id.cmp(&b.node_id));
            let mut hasher = crc32fast::Hasher::new();
            for m in sorted {
                let bytes =
                    rmp_serde::to_vec(m).expect("membership serialization never fails");
                hasher.update(&bytes);
            }
            self.cached_checksum = hasher.finalize();
            self.dirty = false;
        }
        self.cached_checksum
    }
}

/// Sharded membership table with incremental checksums and
/// incarnation-fenced merge.
///
/// `local_incarnation` is a counter shared with `NodeMetaManager`;
/// `merge_bucket` advances it defensively when a merge batch carries
/// incarnations higher than ours, so a node that briefly lagged (e.g.
/// after a slow restart) doesn't keep re-announcing a now-stale
/// incarnation once it rejoins gossip.
pub struct BucketTable {
    bucket_count: u32,
    delta: u64,
    local_node_id: NodeId,
    local_incarnation: Arc<AtomicU64>,
    buckets: Vec<Mutex<Bucket>>,
    views: DashMap<NodeId, u32>,
}

impl BucketTable {
    pub fn new(local_node_id: NodeId, local_incarnation: Arc<AtomicU64>) -> Self {
        Self::with_config(
            local_node_id,
            local_incarnation,
            DEFAULT_BUCKET_COUNT,
            DEFAULT_DELTA,
        )
    }

    pub fn with_config(
        local_node_id: NodeId,
        local_incarnation: Arc<AtomicU64>,
        bucket_count: u32,
        delta: u64,
    ) -> Self {
        let buckets = (0..bucket_count).map(|_| Mutex::new(Bucket::new())).collect();
        Self {
            bucket_count,
            delta,
            local_node_id,
            local_incarnation,
            buckets,
            views: DashMap::new(),
        }
    }

    pub fn bucket_count(&self) -> u32 {
        self.bucket_count
    }

    fn bucket_id_for(&self, node_id: &NodeId) -> u32 {
        bucket_for(node_id, self.bucket_count)
    }

    /// Local-origin update: caller has already bumped the membership's
    /// own incarnation (`NodeMetaManager::bump_incarnation`).
    pub fn add_or_update(&self, m: Membership) {
        let bucket_id = self.bucket_id_for(&m.node_id);
        self.views.insert(m.node_id.clone(), bucket_id);
        self.buckets[bucket_id as usize].lock().add_or_update(m);
    }

    pub fn get_checksums(&self) -> HashMap<u32, u32> {
        self.buckets
            .iter()
            .enumerate()
            .map(|(id, bucket)| (id as u32, bucket.lock().checksum()))
            .collect()
    }

    pub fn get_bucket_memberships(&self, bucket_id: u32) -> Vec<Membership> {
        let Some(bucket) = self.buckets.get(bucket_id as usize) else {
            return Vec::new();
        };
        bucket.lock().members.values().cloned().collect()
    }

    pub fn get_membership(&self, node_id: &NodeId) -> Option<Membership> {
        let bucket_id = *self.views.get(node_id)?;
        self.buckets[bucket_id as usize].lock().members.get(node_id).cloned()
    }

    pub fn pick_random_member(&self) -> Option<NodeId> {
        if self.views.is_empty() {
            return None;
        }
        let idx = rand::random::<usize>() % self.views.len();
        self.views.iter().nth(idx).map(|e| e.key().clone())
    }

    fn local_record<'a>(&self, bucket: &'a Bucket) -> Option<&'a Membership> {
        bucket.members.get(&self.local_node_id)
    }

    /// Merge `remote_members` (already filtered to exclude the local
    /// node_id by the caller) into `bucket_id`.
    pub fn merge_bucket(&self, bucket_id: u32, remote_members: &[Membership]) -> MembershipDiff {
        let mut diff = MembershipDiff::default();
        let Some(bucket_lock) = self.buckets.get(bucket_id as usize) else {
            return diff;
        };
        let mut bucket = bucket_lock.lock();

        if !remote_members.is_empty() {
            let in_remove_phase = self
                .local_record(&bucket)
                .is_some_and(|m| m.is_remove_phase());
            if !in_remove_phase {
                let remote_max = remote_members.iter().map(|m| m.incarnation).max().unwrap();
                self.local_incarnation.fetch_max(remote_max, Ordering::AcqRel);
            }
        }

        let mut seen_remote: std::collections::HashSet<&NodeId> = std::collections::HashSet::new();
        for m in remote_members {
            seen_remote.insert(&m.node_id);
            match bucket.members.get(&m.node_id) {
                None => {
                    bucket.add_or_update(m.clone());
                    diff.added.push(m.node_id.clone());
                }
                Some(local) => {
                    let expired = local.incarnation > m.incarnation + self.delta && m.is_remove_phase();
                    if expired {
                        bucket.remove(&m.node_id);
                        diff.removed.push(m.node_id.clone());
                    } else if m.is_newer_than(local) {
                        bucket.add_or_update(m.clone());
                        diff.updated.push(m.node_id.clone());
                    }
                }
            }
        }

        let current_incarnation = self.local_incarnation.load(Ordering::Acquire);
        let locally_missing: Vec<NodeId> = bucket
            .members
            .values()
            .filter(|local| {
                !seen_remote.contains(&local.node_id)
                    && local.is_remove_phase()
                    && local.incarnation + self.delta < current_incarnation
            })
            .map(|local| local.node_id.clone())
            .collect();
        for node_id in locally_missing {
            bucket.remove(&node_id);
            diff.removed.push(node_id);
        }

        if !diff.is_empty() {
            for node_id in diff.added.iter().chain(diff.updated.iter()) {
                self.views.insert(node_id.clone(), bucket_id);
            }
            for node_id in &diff.removed {
                self.views.remove(node_id);
            }
        }

        diff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::node::{NodePhase, NodeSize};

    fn membership(node_id: &str, phase: NodePhase, incarnation: u64) -> Membership {
        Membership {
            node_id: NodeId::new(node_id),
            address: "127.0.0.1:9000".into(),
            size: NodeSize::M,
            phase,
            epoch: 0,
            incarnation,
            tokens: vec![],
        }
    }

    fn table() -> BucketTable {
        BucketTable::new(NodeId::new("self"), Arc::new(AtomicU64::new(0)))
    }

    #[test]
    fn checksum_is_stable_for_same_members_regardless_of_insert_order() {
        let t1 = table();
        t1.add_or_update(membership("a", NodePhase::Ready, 1));
        t1.add_or_update(membership("b", NodePhase::Ready, 1));

        let t2 = table();
        t2.add_or_update(membership("b", NodePhase::Ready, 1));
        t2.add_or_update(membership("a", NodePhase::Ready, 1));

        assert_eq!(t1.get_checksums(), t2.get_checksums());
    }

    #[test]
    fn merge_adds_unknown_members() {
        let t = table();
        let remote = vec![membership("a", NodePhase::Ready, 1)];
        let bucket_id = bucket_for(&NodeId::new("a"), DEFAULT_BUCKET_COUNT);
        let diff = t.merge_bucket(bucket_id, &remote);
        assert_eq!(diff.added, vec![NodeId::new("a")]);
        assert_eq!(t.get_bucket_memberships(bucket_id).len(), 1);
    }

    #[test]
    fn merge_updates_when_remote_is_newer() {
        let t = table();
        let bucket_id = bucket_for(&NodeId::new("a"), DEFAULT_BUCKET_COUNT);
        t.merge_bucket(bucket_id, &[membership("a", NodePhase::Ready, 1)]);

        let diff = t.merge_bucket(bucket_id, &[membership("a", NodePhase::Ready, 2)]);
        assert_eq!(diff.updated, vec![NodeId::new("a")]);
    }

    #[test]
    fn merge_ignores_stale_remote() {
        let t = table();
        let bucket_id = bucket_for(&NodeId::new("a"), DEFAULT_BUCKET_COUNT);
        t.merge_bucket(bucket_id, &[membership("a", NodePhase::Ready, 5)]);

        let diff = t.merge_bucket(bucket_id, &[membership("a", NodePhase::Ready, 2)]);
        assert!(diff.is_empty());
    }

    #[test]
    fn merge_expires_logically_old_remove_phase_entries() {
        let t = table();
        let bucket_id = bucket_for(&NodeId::new("a"), DEFAULT_BUCKET_COUNT);
        t.merge_bucket(bucket_id, &[membership("a", NodePhase::Ready, 10)]);

        let diff = t.merge_bucket(bucket_id, &[membership("a", NodePhase::Draining, 1)]);
        assert_eq!(diff.removed, vec![NodeId::new("a")]);
    }

    #[test]
    fn pick_random_member_returns_none_when_empty() {
        let t = table();
        assert_eq!(t.pick_random_member(), None);
    }
}
