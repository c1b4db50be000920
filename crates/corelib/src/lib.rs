//! Core library: hash space, tokens, ring, partitioner, HLC, and the
//! membership/node types shared by every other crate in the workspace.

pub mod error;
pub mod hlc;
pub mod membership;
pub mod node;
pub mod partitioner;
pub mod ring;
pub mod token;
pub mod vnode;

pub use error::{Error, Result};
pub use hlc::{Hlc, LwwResolver};
pub use membership::{Membership, MembershipChange, MembershipDiff, View};
pub use node::{Node, NodeId, NodePhase, NodeSize};
pub use partitioner::{LogicalPartition, PartitionPlacement, Partitioner};
pub use ring::{Ring, RingBuilder};
pub use token::Token;
pub use vnode::VNode;
