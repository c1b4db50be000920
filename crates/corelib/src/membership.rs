//! Membership records exchanged by gossip and stored in the bucket table.

use crate::node::{NodeId, NodePhase, NodeSize};
use crate::token::Token;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A node's self-description as propagated through gossip.
///
/// `epoch` increases every time the node restarts or rejoins; within an
/// epoch, `incarnation` increases every time the node republishes state
/// (e.g. after generating tokens, changing phase). Both fence stale
/// updates during merge.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Membership {
    pub node_id: NodeId,
    pub address: String,
    pub size: NodeSize,
    pub phase: NodePhase,
    pub epoch: u64,
    pub incarnation: u64,
    pub tokens: Vec<Token>,
}

impl Membership {
    pub fn is_remove_phase(&self) -> bool {
        self.phase.is_remove_phase()
    }

    /// `a.is_newer_than(b)` iff `(a.epoch, a.incarnation) >
    /// (b.epoch, b.incarnation)`.
    pub fn is_newer_than(&self, other: &Membership) -> bool {
        (self.epoch, self.incarnation) > (other.epoch, other.incarnation)
    }

    pub fn tokens_bytes(&self) -> Vec<[u8; 16]> {
        self.tokens.iter().map(|t| t.to_be_bytes()).collect()
    }

    pub fn tokens_from(bytes: &[Vec<u8>]) -> Vec<Token> {
        bytes
            .iter()
            .filter_map(|b| {
                let arr: [u8; 16] = b.as_slice().try_into().ok()?;
                Some(Token::from_be_bytes(arr))
            })
            .collect()
    }
}

/// A peer's view of the cluster, gathered during seed bootstrap.
#[derive(Clone, Debug)]
pub struct View {
    pub node_id: NodeId,
    pub incarnation: u64,
    pub checksums: HashMap<u32, u32>,
    pub address: String,
}

/// Result of comparing an incoming membership against the local record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MembershipChange {
    Added,
    Updated,
    Removed,
    Unchanged,
}

/// Outcome of merging a bucket's remote memberships into the local
/// bucket: the sets of node_ids that were added, updated, or removed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub added: Vec<NodeId>,
    pub updated: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(epoch: u64, incarnation: u64) -> Membership {
        Membership {
            node_id: NodeId::new("a"),
            address: "127.0.0.1:9000".to_string(),
            size: NodeSize::M,
            phase: NodePhase::Ready,
            epoch,
            incarnation,
            tokens: vec![Token(1), Token(2)],
        }
    }

    #[test]
    fn is_newer_than_compares_epoch_then_incarnation() {
        assert!(sample(3, 0).is_newer_than(&sample(2, 99)));
        assert!(sample(3, 5).is_newer_than(&sample(3, 4)));
        assert!(!sample(3, 4).is_newer_than(&sample(3, 4)));
    }

    #[test]
    fn tokens_bytes_round_trips_through_tokens_from() {
        let m = sample(1, 1);
        let bytes: Vec<Vec<u8>> = m.tokens_bytes().iter().map(|b| b.to_vec()).collect();
        assert_eq!(Membership::tokens_from(&bytes), m.tokens);
    }

    #[test]
    fn diff_is_empty_when_no_changes() {
        assert!(MembershipDiff::default().is_empty());
    }
}
