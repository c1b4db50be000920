//! Virtual node abstractions.
//!
//! Each physical node owns `NodeSize::vnode_count()` virtual nodes spread
//! around the ring so that joins/leaves move a small, even fraction of
//! keys instead of a contiguous block.

use crate::node::NodeId;
use crate::token::Token;

/// A single token position owned by a physical node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VNode {
    pub token: Token,
    pub node_id: NodeId,
}

impl VNode {
    pub fn new(token: Token, node_id: NodeId) -> Self {
        Self { token, node_id }
    }

    /// Generate every vnode owned by `node_id`, deriving tokens from
    /// `hash(node_id || "#" || i)`.
    pub fn for_node(node_id: &NodeId, count: usize) -> Vec<VNode> {
        Token::generate_tokens(node_id.as_str(), count)
            .into_iter()
            .map(|token| VNode::new(token, node_id.clone()))
            .collect()
    }

    /// Reconstruct vnodes from a persisted token list (used when restoring
    /// a membership's `tokens` field rather than regenerating them).
    pub fn from_tokens(node_id: &NodeId, tokens: &[Token]) -> Vec<VNode> {
        tokens
            .iter()
            .map(|&token| VNode::new(token, node_id.clone()))
            .collect()
    }
}

impl std::fmt::Display for VNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VNode(token={}, node={})", self.token, self.node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn for_node_produces_requested_count() {
        let id = NodeId::new("node-a");
        let vnodes = VNode::for_node(&id, 6);
        assert_eq!(vnodes.len(), 6);
        assert!(vnodes.iter().all(|v| v.node_id == id));
    }

    #[test]
    fn from_tokens_preserves_order() {
        let id = NodeId::new("node-a");
        let tokens = vec![Token(5), Token(1), Token(9)];
        let vnodes = VNode::from_tokens(&id, &tokens);
        assert_eq!(vnodes.iter().map(|v| v.token).collect::<Vec<_>>(), tokens);
    }
}
