//! Node identity and membership metadata.
//!
//! Nodes are identified by a stable, operator-assigned string id (matching
//! how the source configures `node.id`). `NodeSize` fixes the virtual node
//! count for a node; `NodePhase` tracks where a node sits in the join/drain
//! lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for a node in the cluster.
///
/// A newtype over `String` rather than a numeric id: the wire protocol and
/// persisted state both carry node ids as opaque strings (often a hostname
/// or a generated UUID), and nothing in the system benefits from parsing
/// them as numbers.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Logical node participating in the ring.
///
/// Keep this struct small and cheap to clone; heavy mutable state
/// (connections, gossip counters, etc.) lives elsewhere.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    pub address: String,
    pub size: NodeSize,
}

impl Node {
    pub fn new(id: NodeId, address: impl Into<String>, size: NodeSize) -> Self {
        Self {
            id,
            address: address.into(),
            size,
        }
    }
}

/// Capacity class controlling how many virtual nodes a physical node owns.
///
/// The enumeration and its vnode counts mirror the source's `NodeSize`
/// table exactly so that clusters mixing differently sized nodes still
/// distribute load the same way a reference deployment would.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[repr(u16)]
pub enum NodeSize {
    Xs = 1,
    S = 2,
    M = 4,
    L = 8,
    Xl = 16,
    Xxl = 32,
}

impl NodeSize {
    /// Number of virtual nodes (tokens) a node of this size is assigned.
    pub fn vnode_count(self) -> usize {
        self as u16 as usize
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "xs" => Some(Self::Xs),
            "s" => Some(Self::S),
            "m" => Some(Self::M),
            "l" => Some(Self::L),
            "xl" => Some(Self::Xl),
            "xxl" => Some(Self::Xxl),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Xs => "xs",
            Self::S => "s",
            Self::M => "m",
            Self::L => "l",
            Self::Xl => "xl",
            Self::Xxl => "xxl",
        }
    }
}

impl fmt::Display for NodeSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle phase of a node as recorded in its own membership record.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum NodePhase {
    Idle,
    Joining,
    Ready,
    Draining,
    Failed,
}

impl NodePhase {
    pub fn is_remove_phase(self) -> bool {
        matches!(self, Self::Idle | Self::Draining)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Joining => "joining",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "joining" => Some(Self::Joining),
            "ready" => Some(Self::Ready),
            "draining" => Some(Self::Draining),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
