//! 128-bit hash space and token arithmetic.
//!
//! Positions on the ring are points in `[0, 2^128)`. The source derives
//! this space from MD5 digests; we keep that choice so independently
//! built nodes agree on placement without needing to negotiate a hash
//! function.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A position in the 128-bit token space.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Token(pub u128);

impl Token {
    pub const ZERO: Token = Token(0);
    pub const MAX: Token = Token(u128::MAX);

    /// `hash(bytes) -> Token`: first 16 bytes of the MD5 digest, read
    /// big-endian. Stable across releases by construction.
    pub fn hash(bytes: &[u8]) -> Self {
        let mut hasher = Md5::new();
        hasher.update(bytes);
        let digest = hasher.finalize();
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&digest);
        Token(u128::from_be_bytes(buf))
    }

    /// `token(label, i) = hash(label || "#" || i)`.
    pub fn for_vnode(label: &str, index: usize) -> Self {
        let mut buf = Vec::with_capacity(label.len() + 1 + 20);
        buf.extend_from_slice(label.as_bytes());
        buf.push(b'#');
        buf.extend_from_slice(index.to_string().as_bytes());
        Self::hash(&buf)
    }

    /// `generate_tokens(node_id, size)`: `size` distinct tokens for a node.
    /// Collisions across nodes are astronomically unlikely and left
    /// unhandled, as the source does.
    pub fn generate_tokens(label: &str, count: usize) -> Vec<Token> {
        (0..count).map(|i| Self::for_vnode(label, i)).collect()
    }

    pub fn to_be_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        Token(u128::from_be_bytes(bytes))
    }

    /// `add(x, y) = (x + y) mod 2^128`.
    pub fn wrapping_add(self, other: u128) -> Self {
        Token(self.0.wrapping_add(other))
    }

    /// `in_interval(h, lo, hi)`, treating `hi < lo` as wrap-around.
    pub fn in_interval(h: Token, lo: Token, hi: Token) -> bool {
        if lo <= hi {
            h > lo && h <= hi
        } else {
            h > lo || h <= hi
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:032x})", self.0)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(Token::hash(b"hello"), Token::hash(b"hello"));
        assert_ne!(Token::hash(b"hello"), Token::hash(b"world"));
    }

    #[test]
    fn generate_tokens_yields_distinct_values() {
        let tokens = Token::generate_tokens("node-a", 8);
        assert_eq!(tokens.len(), 8);
        let mut sorted = tokens.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), tokens.len());
    }

    #[test]
    fn in_interval_handles_wraparound() {
        let lo = Token(200);
        let hi = Token(50);
        assert!(Token::in_interval(Token(10), lo, hi));
        assert!(Token::in_interval(Token(250), lo, hi));
        assert!(!Token::in_interval(Token(100), lo, hi));
    }

    #[test]
    fn in_interval_normal_range_excludes_lo_includes_hi() {
        let lo = Token(10);
        let hi = Token(20);
        assert!(!Token::in_interval(Token(10), lo, hi));
        assert!(Token::in_interval(Token(20), lo, hi));
        assert!(Token::in_interval(Token(15), lo, hi));
    }

    #[test]
    fn be_bytes_round_trip() {
        let t = Token::hash(b"round-trip");
        assert_eq!(Token::from_be_bytes(t.to_be_bytes()), t);
    }

    proptest::proptest! {
        #[test]
        fn be_bytes_round_trips_for_any_u128(hi: u64, lo: u64) {
            let raw = ((hi as u128) << 64) | lo as u128;
            let t = Token(raw);
            proptest::prop_assert_eq!(Token::from_be_bytes(t.to_be_bytes()), t);
        }

        #[test]
        fn hash_is_deterministic_for_any_input(bytes: Vec<u8>) {
            proptest::prop_assert_eq!(Token::hash(&bytes), Token::hash(&bytes));
        }

        #[test]
        fn in_interval_is_reflexive_on_hi_and_excludes_lo(hi: u64, lo: u64) {
            proptest::prop_assume!(hi != lo);
            let lo = Token(lo as u128);
            let hi = Token(hi as u128);
            proptest::prop_assert!(Token::in_interval(hi, lo, hi));
            proptest::prop_assert!(!Token::in_interval(lo, lo, hi));
        }
    }
}
