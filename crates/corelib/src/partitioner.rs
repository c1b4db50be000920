//! Logical partitioning of the 128-bit token space.
//!
//! Given `partition_shift S`, the space is divided into `Q = 1 << S` equal
//! half-open intervals `(start, end]`. Every key falls into exactly one
//! partition; the partition's storage keyspace prefix is the lowercase hex
//! encoding of its id, which must stay stable across releases because it
//! is embedded directly into persisted storage keys.

use crate::ring::Ring;
use crate::token::Token;
use crate::vnode::VNode;

/// One interval of the token space, identified by `pid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogicalPartition {
    pub pid: u64,
    pub start: Token,
    pub end: Token,
}

impl LogicalPartition {
    pub fn contains(&self, h: Token) -> bool {
        Token::in_interval(h, self.start, self.end)
    }

    /// `pid_bytes = lowercase_hex(pid)` (no leading zeros).
    pub fn keyspace(&self) -> String {
        format!("{:x}", self.pid)
    }
}

/// Placement result for a key: the partition it falls in and the vnode
/// responsible for storing it.
#[derive(Debug, Clone)]
pub struct PartitionPlacement {
    pub partition: LogicalPartition,
    pub vnode: VNode,
}

/// Divides `[0, 2^128)` into `2^partition_shift` fixed partitions.
#[derive(Debug, Clone, Copy)]
pub struct Partitioner {
    shift: u32,
}

impl Partitioner {
    pub fn new(partition_shift: u32) -> Self {
        assert!(partition_shift < 64, "partition_shift too large");
        Self {
            shift: partition_shift,
        }
    }

    pub fn partition_count(&self) -> u64 {
        1u64 << self.shift
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    fn step(&self) -> u128 {
        // 2^128 / Q, computed without overflow by shifting instead of
        // dividing: step = 2^(128 - shift).
        if self.shift == 0 {
            0 // single partition spans the whole space; step is unused
        } else {
            1u128 << (128 - self.shift)
        }
    }

    /// `pid = h >> (128 - S)`.
    pub fn pid_for_hash(&self, h: Token) -> u64 {
        if self.shift == 0 {
            return 0;
        }
        (h.0 >> (128 - self.shift)) as u64
    }

    /// `(start, end] = (pid * step, (pid + 1) * step]`.
    pub fn partition_for_pid(&self, pid: u64) -> LogicalPartition {
        if self.shift == 0 {
            return LogicalPartition {
                pid: 0,
                start: Token::ZERO,
                end: Token::MAX,
            };
        }
        let step = self.step();
        let start = Token((pid as u128).wrapping_mul(step));
        let end_val = ((pid as u128) + 1).wrapping_mul(step);
        let end = if pid + 1 == self.partition_count() {
            Token::MAX
        } else {
            Token(end_val)
        };
        LogicalPartition { pid, start, end }
    }

    pub fn partition_for_hash(&self, h: Token) -> LogicalPartition {
        self.partition_for_pid(self.pid_for_hash(h))
    }

    pub fn partition_for_key(&self, key: &[u8]) -> LogicalPartition {
        self.partition_for_hash(Token::hash(key))
    }

    /// `find_placement_by_key(k, ring) = { partition_for_hash(hash(k)),
    /// ring.find_successor(end) }`.
    pub fn find_placement_by_key(&self, key: &[u8], ring: &Ring) -> Option<PartitionPlacement> {
        let partition = self.partition_for_key(key);
        let vnode = ring.find_successor(partition.end)?.clone();
        Some(PartitionPlacement { partition, vnode })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    #[test]
    fn pid_for_hash_is_in_range() {
        let p = Partitioner::new(4);
        for h in [Token(0), Token(u128::MAX / 2), Token::MAX] {
            assert!(p.pid_for_hash(h) < p.partition_count());
        }
    }

    #[test]
    fn partition_bounds_are_half_open() {
        let p = Partitioner::new(4);
        let part = p.partition_for_pid(0);
        assert!(!part.contains(part.start));
        assert!(part.contains(part.end));
    }

    #[test]
    fn last_partition_ends_at_max_token() {
        let p = Partitioner::new(4);
        let last = p.partition_for_pid(p.partition_count() - 1);
        assert_eq!(last.end, Token::MAX);
    }

    #[test]
    fn keyspace_is_lowercase_hex_no_padding() {
        let p = Partitioner::new(4);
        assert_eq!(p.partition_for_pid(10).keyspace(), "a");
        assert_eq!(p.partition_for_pid(0).keyspace(), "0");
    }

    #[test]
    fn placement_routes_to_successor_of_partition_end() {
        use crate::ring::Ring;
        use crate::vnode::VNode;

        let vnodes = vec![
            VNode::new(Token(50), NodeId::new("a")),
            VNode::new(Token(150), NodeId::new("b")),
            VNode::new(Token(250), NodeId::new("c")),
        ];
        let ring = Ring::from_vnodes(vnodes);
        let p = Partitioner::new(4);

        // Force a key into a partition whose end boundary is below 50.
        let placement = p.find_placement_by_key(b"whatever-key", &ring).unwrap();
        assert_eq!(
            placement.vnode,
            *ring.find_successor(placement.partition.end).unwrap()
        );
    }
}
