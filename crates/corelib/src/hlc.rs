//! Hybrid logical clock and last-writer-wins conflict resolution.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// `(physical_ms, logical, node_id)`, totally ordered lexicographically.
/// `node_id` participates in the order so ties across nodes are
/// impossible.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Hlc {
    pub physical: u64,
    pub logical: u64,
    pub node_id: NodeId,
}

impl Hlc {
    pub fn initial(node_id: NodeId) -> Self {
        Self {
            physical: 0,
            logical: 0,
            node_id,
        }
    }

    pub fn new(physical: u64, logical: u64, node_id: NodeId) -> Self {
        Self {
            physical,
            logical,
            node_id,
        }
    }

    /// `tick_local(now_ms)`.
    pub fn tick_local(&self, now_ms: u64) -> Self {
        if now_ms > self.physical {
            Hlc::new(now_ms, 0, self.node_id.clone())
        } else {
            Hlc::new(self.physical, self.logical + 1, self.node_id.clone())
        }
    }

    /// `tick_on_receive(remote, now_ms)`.
    pub fn tick_on_receive(&self, remote: &Hlc, now_ms: u64) -> Self {
        let pt = self.physical.max(remote.physical).max(now_ms);
        let lt = if pt == self.physical && pt == remote.physical {
            self.logical.max(remote.logical) + 1
        } else if pt == self.physical && self.physical > remote.physical {
            self.logical + 1
        } else if pt == remote.physical && remote.physical > self.physical {
            remote.logical + 1
        } else {
            0
        };
        Hlc::new(pt, lt, self.node_id.clone())
    }

    /// 8-byte big-endian physical, 4-byte big-endian logical, then the
    /// node id's UTF-8 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 4 + self.node_id.as_str().len());
        buf.extend_from_slice(&self.physical.to_be_bytes());
        buf.extend_from_slice(&(self.logical as u32).to_be_bytes());
        buf.extend_from_slice(self.node_id.as_str().as_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 12 {
            return None;
        }
        let physical = u64::from_be_bytes(bytes[0..8].try_into().ok()?);
        let logical = u32::from_be_bytes(bytes[8..12].try_into().ok()?) as u64;
        let node_id = std::str::from_utf8(&bytes[12..]).ok()?.to_string();
        Some(Hlc::new(physical, logical, NodeId::new(node_id)))
    }
}

/// Total order over `(physical, logical, node_id)`.
impl Ord for Hlc {
    fn cmp(&self, other: &Self) -> Ordering {
        self.physical
            .cmp(&other.physical)
            .then(self.logical.cmp(&other.logical))
            .then(self.node_id.cmp(&other.node_id))
    }
}

impl PartialOrd for Hlc {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Last-writer-wins conflict resolver over a set of candidate HLCs.
pub struct LwwResolver;

impl LwwResolver {
    /// Returns the HLC that should win, i.e. the greatest under the
    /// total order. Panics on an empty slice — callers always have at
    /// least the local version to compare against.
    pub fn resolve<'a>(candidates: &'a [Hlc]) -> &'a Hlc {
        candidates
            .iter()
            .max()
            .expect("resolve requires at least one candidate")
    }
}
