//! Gossip-based membership convergence and replica topology.
//!
//! [`bucket`] shards memberships for cheap checksum comparison;
//! [`topology`] keeps the bucket table and the consistent-hashing ring
//! in sync; [`node_meta`] persists this node's own identity; [`gossip`]
//! drives convergence over a pluggable transport; [`throttling`] paces
//! it.

pub mod bucket;
pub mod error;
pub mod gossip;
pub mod node_meta;
pub mod throttling;
pub mod topology;

pub use bucket::{BucketTable, DEFAULT_BUCKET_COUNT, DEFAULT_DELTA};
pub use error::{Error, Result};
pub use gossip::{BucketMessage, ChecksumsMessage, GossipTransport, Gossiper};
pub use node_meta::NodeMetaManager;
pub use throttling::{CubicRateController, CubicRateLimiter, ExponentialBackoff};
pub use topology::TopologyManager;
