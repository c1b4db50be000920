//! Composition root for the storage node process: configuration
//! loading, the join/drain state machine, the gossip wire handlers,
//! the client-facing key/value handlers, and the startup/shutdown
//! sequencing that ties them to the transport layer.

pub mod config;
pub mod handlers;
pub mod kv;
pub mod lifecycle;
pub mod node_service;
pub mod seed_bootstrap;
pub mod telemetry;

pub use config::{CliArgs, NodeConfig};
pub use lifecycle::LifecycleService;
