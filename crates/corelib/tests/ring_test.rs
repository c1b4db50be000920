//! Integration tests for the hash ring implementation.

use corelib::node::NodeId;
use corelib::ring::{Ring, RingBuilder};
use corelib::vnode::VNode;

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
fn add_node_and_lookup() {
    let ring = Ring::new().add_vnodes(VNode::for_node(&node("a"), 4));

    assert_eq!(ring.node_count(), 1);
    assert_eq!(ring.token_count(), 4);

    let result = ring.lookup(b"test-key");
    assert_eq!(result, Some(node("a")));
}

#[test]
fn remove_node() {
    let ring = Ring::new()
        .add_vnodes(VNode::for_node(&node("a"), 4))
        .add_vnodes(VNode::for_node(&node("b"), 4));

    assert_eq!(ring.node_count(), 2);
    assert_eq!(ring.token_count(), 8);

    let mut ids = std::collections::HashSet::new();
    ids.insert(node("a"));
    let ring = ring.drop_nodes(&ids);

    assert_eq!(ring.node_count(), 1);
    assert_eq!(ring.token_count(), 4);
    assert_eq!(ring.lookup(b"some-key"), Some(node("b")));
}

#[test]
fn consistent_lookup() {
    let ring = Ring::new()
        .add_vnodes(VNode::for_node(&node("a"), 4))
        .add_vnodes(VNode::for_node(&node("b"), 4));

    let key = b"consistent-key";
    let first = ring.lookup(key);
    assert_eq!(first, ring.lookup(key));
    assert_eq!(first, ring.lookup(key));
}

#[test]
fn ring_builder_default_vnodes() {
    let ring = RingBuilder::new()
        .add_node(node("a"))
        .add_node(node("b"))
        .build();

    assert!(ring.lookup(b"key").is_some());
    assert_eq!(ring.node_count(), 2);
    assert_eq!(ring.token_count(), 512);
}

#[test]
fn ring_builder_custom_vnodes() {
    let ring = RingBuilder::new()
        .with_vnodes(8)
        .add_node(node("a"))
        .add_node(node("b"))
        .build();

    assert_eq!(ring.node_count(), 2);
    assert_eq!(ring.token_count(), 16);
}

#[test]
fn ring_builder_mixed_vnodes() {
    let ring = RingBuilder::new()
        .with_vnodes(4)
        .add_node(node("a"))
        .add_node_with_vnodes(node("b"), 8)
        .build();

    assert_eq!(ring.node_count(), 2);
    assert_eq!(ring.token_count(), 12);
}

#[test]
fn single_node_owns_every_key() {
    let ring = Ring::new().add_vnodes(VNode::for_node(&node("a"), 4));

    for key in [b"key1".as_slice(), b"key2", b"key3", b"very-long-key-name"] {
        assert_eq!(ring.lookup(key), Some(node("a")));
    }
}

#[test]
fn add_remove_add() {
    let ring = Ring::new().add_vnodes(VNode::for_node(&node("a"), 4));
    assert_eq!(ring.node_count(), 1);

    let mut ids = std::collections::HashSet::new();
    ids.insert(node("a"));
    let ring = ring.drop_nodes(&ids);
    assert_eq!(ring.node_count(), 0);

    let ring = ring.add_vnodes(VNode::for_node(&node("a"), 4));
    assert_eq!(ring.node_count(), 1);
    assert!(ring.lookup(b"key").is_some());
}

#[test]
fn idempotent_add_accumulates_vnodes() {
    let ring = Ring::new().add_vnodes(VNode::for_node(&node("a"), 4));
    assert_eq!(ring.token_count(), 4);

    let ring = ring.add_vnodes(VNode::for_node(&node("a"), 4));
    assert_eq!(ring.token_count(), 8);
    assert_eq!(ring.node_count(), 1);
}

#[test]
fn wraparound_successor_is_first_vnode() {
    use corelib::token::Token;

    let vnodes = vec![
        VNode::new(Token(50), node("a")),
        VNode::new(Token(150), node("b")),
        VNode::new(Token(250), node("c")),
    ];
    let ring = Ring::from_vnodes(vnodes);
    assert_eq!(ring.find_successor(Token::MAX).unwrap().node_id, node("a"));
}
