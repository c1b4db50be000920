//! Hash ring data structure: `BTreeMap`-shaped via a sorted `Vec<VNode>`
//! plus binary search, matching the source's `find_successor` contract.

use crate::node::NodeId;
use crate::token::Token;
use crate::vnode::VNode;
use std::collections::HashSet;
use std::sync::Arc;

/// Default vnode count used by `RingBuilder` when the caller doesn't
/// specify one explicitly.
const DEFAULT_VNODES: usize = 256;

/// An immutable, ordered view of token ownership.
///
/// All mutators return a new `Ring`; the underlying vnode list is
/// reference-counted so cloning a `Ring` (e.g. to swap a snapshot under a
/// lock) is cheap.
#[derive(Clone, Debug, Default)]
pub struct Ring {
    vnodes: Arc<Vec<VNode>>,
}

impl Ring {
    pub fn new() -> Self {
        Self {
            vnodes: Arc::new(Vec::new()),
        }
    }

    pub fn from_vnodes(mut vnodes: Vec<VNode>) -> Self {
        vnodes.sort_by(|a, b| a.token.cmp(&b.token));
        Self {
            vnodes: Arc::new(vnodes),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.vnodes.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.vnodes.len()
    }

    pub fn node_count(&self) -> usize {
        let set: HashSet<&NodeId> = self.vnodes.iter().map(|v| &v.node_id).collect();
        set.len()
    }

    pub fn vnodes(&self) -> &[VNode] {
        &self.vnodes
    }

    /// `find_successor(token) -> VNode`: binary search on the sorted token
    /// list for the first vnode with a token strictly greater than
    /// `token`, wrapping to index 0 if none exists. An exact match does
    /// not own its own token — the vnode immediately after it does.
    pub fn find_successor(&self, token: Token) -> Option<&VNode> {
        if self.vnodes.is_empty() {
            return None;
        }
        let idx = match self.vnodes.binary_search_by(|v| v.token.cmp(&token)) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        };
        Some(self.vnodes.get(idx).unwrap_or(&self.vnodes[0]))
    }

    /// Route a key to the node responsible for it.
    pub fn lookup(&self, key: &[u8]) -> Option<NodeId> {
        self.find_successor(Token::hash(key)).map(|v| v.node_id.clone())
    }

    pub fn lookup_vnode(&self, key: &[u8]) -> Option<&VNode> {
        self.find_successor(Token::hash(key))
    }

    /// `add_vnodes(vs) -> Ring`: local sort of `vs` then a linear merge
    /// with the existing list.
    pub fn add_vnodes(&self, mut vs: Vec<VNode>) -> Ring {
        vs.sort_by(|a, b| a.token.cmp(&b.token));

        let mut merged = Vec::with_capacity(self.vnodes.len() + vs.len());
        let (mut i, mut j) = (0, 0);
        while i < self.vnodes.len() && j < vs.len() {
            if self.vnodes[i].token <= vs[j].token {
                merged.push(self.vnodes[i].clone());
                i += 1;
            } else {
                merged.push(vs[j].clone());
                j += 1;
            }
        }
        merged.extend_from_slice(&self.vnodes[i..]);
        merged.extend_from_slice(&vs[j..]);

        Ring {
            vnodes: Arc::new(merged),
        }
    }

    /// `drop_nodes(ids) -> Ring`: filter out all vnodes whose node_id is
    /// in the set.
    pub fn drop_nodes(&self, ids: &HashSet<NodeId>) -> Ring {
        let filtered: Vec<VNode> = self
            .vnodes
            .iter()
            .filter(|v| !ids.contains(&v.node_id))
            .cloned()
            .collect();
        Ring {
            vnodes: Arc::new(filtered),
        }
    }

    /// Circular iteration starting at `vnode` (inclusive), wrapping once
    /// around the ring.
    pub fn iter_from<'a>(&'a self, vnode: &VNode) -> RingIter<'a> {
        let start = self
            .vnodes
            .iter()
            .position(|v| v == vnode)
            .unwrap_or(0);
        RingIter {
            vnodes: &self.vnodes,
            start,
            offset: 0,
        }
    }

    /// Walk from `vnode`, collecting vnodes belonging to distinct
    /// node_ids until `rf` distinct owners are found.
    pub fn preference_list(&self, vnode: &VNode, rf: usize) -> Vec<NodeId> {
        let mut owners = Vec::with_capacity(rf);
        let mut seen: HashSet<NodeId> = HashSet::new();
        for v in self.iter_from(vnode) {
            if seen.insert(v.node_id.clone()) {
                owners.push(v.node_id.clone());
                if owners.len() >= rf {
                    break;
                }
            }
        }
        owners
    }
}

pub struct RingIter<'a> {
    vnodes: &'a [VNode],
    start: usize,
    offset: usize,
}

impl<'a> Iterator for RingIter<'a> {
    type Item = &'a VNode;

    fn next(&mut self) -> Option<Self::Item> {
        if self.vnodes.is_empty() || self.offset >= self.vnodes.len() {
            return None;
        }
        let idx = (self.start + self.offset) % self.vnodes.len();
        self.offset += 1;
        Some(&self.vnodes[idx])
    }
}

/// Builder for constructing a `Ring` from a sequence of node additions.
///
/// ```
/// use corelib::{NodeId, RingBuilder};
///
/// let ring = RingBuilder::new()
///     .with_vnodes(8)
///     .add_node(NodeId::new("a"))
///     .add_node_with_vnodes(NodeId::new("b"), 16)
///     .build();
/// assert_eq!(ring.token_count(), 24);
/// ```
#[derive(Default)]
pub struct RingBuilder {
    default_vnodes: usize,
    vnodes: Vec<VNode>,
}

impl RingBuilder {
    pub fn new() -> Self {
        Self {
            default_vnodes: DEFAULT_VNODES,
            vnodes: Vec::new(),
        }
    }

    pub fn with_vnodes(mut self, n: usize) -> Self {
        self.default_vnodes = n;
        self
    }

    pub fn add_node(mut self, node_id: NodeId) -> Self {
        let count = self.default_vnodes;
        self.vnodes.extend(VNode::for_node(&node_id, count));
        self
    }

    pub fn add_node_with_vnodes(mut self, node_id: NodeId, count: usize) -> Self {
        self.vnodes.extend(VNode::for_node(&node_id, count));
        self
    }

    pub fn build(self) -> Ring {
        Ring::from_vnodes(self.vnodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NodeId {
        NodeId::new(id)
    }

    #[test]
    fn empty_ring_lookup() {
        let ring = Ring::new();
        assert_eq!(ring.lookup(b"key1"), None);
        assert_eq!(ring.node_count(), 0);
        assert_eq!(ring.token_count(), 0);
    }

    #[test]
    fn add_and_lookup() {
        let ring = Ring::new().add_vnodes(VNode::for_node(&node("a"), 4));
        assert_eq!(ring.node_count(), 1);
        assert_eq!(ring.token_count(), 4);
        assert_eq!(ring.lookup(b"k"), Some(node("a")));
    }

    #[test]
    fn find_successor_wraps_around() {
        let vnodes = vec![
            VNode::new(Token(50), node("a")),
            VNode::new(Token(150), node("b")),
            VNode::new(Token(250), node("c")),
        ];
        let ring = Ring::from_vnodes(vnodes);
        assert_eq!(ring.find_successor(Token(251)).unwrap().node_id, node("a"));
        assert_eq!(ring.find_successor(Token(100)).unwrap().node_id, node("b"));
        // An exact token match belongs to the *next* vnode, not the one
        // that owns the matched token.
        assert_eq!(ring.find_successor(Token(50)).unwrap().node_id, node("b"));
        assert_eq!(ring.find_successor(Token(250)).unwrap().node_id, node("a"));
    }

    #[test]
    fn drop_nodes_removes_all_of_a_nodes_vnodes() {
        let ring = Ring::new()
            .add_vnodes(VNode::for_node(&node("a"), 4))
            .add_vnodes(VNode::for_node(&node("b"), 4));
        let mut ids = HashSet::new();
        ids.insert(node("a"));
        let ring = ring.drop_nodes(&ids);
        assert_eq!(ring.node_count(), 1);
        assert_eq!(ring.token_count(), 4);
    }

    #[test]
    fn preference_list_collects_distinct_owners() {
        let vnodes = vec![
            VNode::new(Token(10), node("a")),
            VNode::new(Token(20), node("a")),
            VNode::new(Token(30), node("b")),
            VNode::new(Token(40), node("c")),
        ];
        let ring = Ring::from_vnodes(vnodes.clone());
        let prefs = ring.preference_list(&vnodes[0], 3);
        assert_eq!(prefs, vec![node("a"), node("b"), node("c")]);
    }

    #[test]
    fn builder_default_vnode_count() {
        let ring = RingBuilder::new()
            .add_node(node("a"))
            .add_node(node("b"))
            .build();
        assert_eq!(ring.node_count(), 2);
        assert_eq!(ring.token_count(), 512);
    }

    #[test]
    fn builder_mixed_vnode_counts() {
        let ring = RingBuilder::new()
            .with_vnodes(4)
            .add_node(node("a"))
            .add_node_with_vnodes(node("b"), 8)
            .build();
        assert_eq!(ring.token_count(), 12);
    }

    proptest::proptest! {
        /// The bug this guards against: `find_successor` returning the
        /// vnode that owns the exact queried token, instead of the next
        /// vnode after it.
        #[test]
        fn find_successor_never_returns_the_exact_token_owner_with_multiple_vnodes(
            mut raw_tokens in proptest::collection::hash_set(0u64..1000, 2..20),
        ) {
            let mut tokens: Vec<u64> = raw_tokens.drain().collect();
            tokens.sort();
            let vnodes: Vec<VNode> = tokens
                .iter()
                .enumerate()
                .map(|(i, t)| VNode::new(Token(*t as u128), node(&format!("n{i}"))))
                .collect();
            let ring = Ring::from_vnodes(vnodes.clone());

            for v in &vnodes {
                let successor = ring.find_successor(v.token).unwrap();
                proptest::prop_assert_ne!(successor.token, v.token);
            }
        }

        #[test]
        fn lookup_is_deterministic_for_repeated_calls(key: Vec<u8>) {
            let ring = Ring::new().add_vnodes(VNode::for_node(&node("a"), 8));
            let first = ring.lookup(&key);
            proptest::prop_assert_eq!(first.clone(), ring.lookup(&key));
            proptest::prop_assert_eq!(first, ring.lookup(&key));
        }
    }
}
