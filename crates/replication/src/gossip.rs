//! Gossip-based membership convergence.
//!
//! The wire-level concerns (framing, TLS, connection pooling) live in
//! the streaming crate; `Gossiper` is generic over a [`GossipTransport`]
//! port so its merge/pacing logic can be exercised without a live
//! network.

use crate::throttling::CubicRateLimiter;
use crate::topology::TopologyManager;
use async_trait::async_trait;
use corelib::membership::Membership;
use corelib::node::NodeId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

pub const DEFAULT_INFLIGHT_LIMIT: usize = 32;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChecksumsMessage {
    pub source: Membership,
    pub checksums: HashMap<u32, u32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BucketMessage {
    pub bucket_id: u32,
    pub members: Vec<Membership>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport error: {0}")]
    Other(String),
}

/// Port the concrete connection pool implements so `Gossiper` stays
/// independent of the wire protocol.
#[async_trait]
pub trait GossipTransport: Send + Sync {
    async fn register(&self, node_id: &NodeId, address: &str);

    async fn send_checksums(
        &self,
        node_id: &NodeId,
        msg: ChecksumsMessage,
    ) -> Result<ChecksumsMessage, TransportError>;

    async fn send_bucket(
        &self,
        node_id: &NodeId,
        address: &str,
        msg: BucketMessage,
    ) -> Result<BucketMessage, TransportError>;
}

pub struct Gossiper<T: GossipTransport> {
    node_id: NodeId,
    topology: Arc<TopologyManager>,
    transport: Arc<T>,
    rate_limiter: Mutex<CubicRateLimiter>,
    inflight_limit: usize,
    inflight: Arc<AtomicUsize>,
}

impl<T: GossipTransport + 'static> Gossiper<T> {
    pub fn new(
        node_id: NodeId,
        topology: Arc<TopologyManager>,
        transport: Arc<T>,
        rate_limiter: CubicRateLimiter,
    ) -> Self {
        Self {
            node_id,
            topology,
            transport,
            rate_limiter: Mutex::new(rate_limiter),
            inflight_limit: DEFAULT_INFLIGHT_LIMIT,
            inflight: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn inflight_is_saturated(&self) -> bool {
        self.inflight.load(Ordering::Acquire) >= self.inflight_limit
    }

    /// Runs until `stop` is signaled. Picks a random peer each tick,
    /// paced by the CUBIC rate limiter, and spawns a fire-and-forget
    /// gossip exchange.
    pub async fn gossip_loop(self: Arc<Self>, mut stop: watch::Receiver<bool>, source: Membership) {
        loop {
            let delay = self.rate_limiter.lock().delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return;
                    }
                }
            }
            if *stop.borrow() {
                return;
            }

            let Some(peer) = self.topology.pick_random_membership() else {
                continue;
            };
            if peer == self.node_id {
                continue;
            }
            if self.inflight_is_saturated() {
                self.rate_limiter.lock().on_error();
                continue;
            }

            let Some(address) = self.topology.get_membership(&peer).map(|m| m.address) else {
                continue;
            };

            let this = self.clone();
            let source = source.clone();
            this.inflight.fetch_add(1, Ordering::AcqRel);
            tokio::spawn(async move {
                let _ = this.attempt_gossip(&peer, &address, source).await;
                this.inflight.fetch_sub(1, Ordering::AcqRel);
            });
        }
    }

    pub async fn attempt_gossip(
        &self,
        peer: &NodeId,
        address: &str,
        source: Membership,
    ) -> Result<(), TransportError> {
        self.transport.register(peer, address).await;
        let msg = ChecksumsMessage {
            source,
            checksums: self.topology.get_checksums(),
        };
        match self.transport.send_checksums(peer, msg).await {
            Ok(_) => {
                self.rate_limiter.lock().on_success();
                Ok(())
            }
            Err(e) => {
                self.rate_limiter.lock().on_error();
                Err(e)
            }
        }
    }

    /// Handles an incoming `gossip/checksums` message: for every bucket
    /// whose checksum differs, either clears the local bucket (remote
    /// reports 0, i.e. empty) or schedules a `gossip/bucket` fetch.
    /// Returns the local checksum map so the caller can embed it in its
    /// own response.
    pub async fn apply_checksums(
        &self,
        msg: &ChecksumsMessage,
        peer_address: &str,
    ) -> HashMap<u32, u32> {
        let local = self.topology.get_checksums();
        for (bucket_id, remote_crc) in &msg.checksums {
            let local_crc = local.get(bucket_id).copied().unwrap_or(0);
            if local_crc == *remote_crc {
                continue;
            }
            if *remote_crc == 0 {
                self.topology.apply_bucket(*bucket_id, Vec::new());
                continue;
            }
            let snapshot = BucketMessage {
                bucket_id: *bucket_id,
                members: self.topology.get_bucket_memberships(*bucket_id),
            };
            let _ = self
                .transport
                .send_bucket(&msg.source.node_id, peer_address, snapshot)
                .await;
        }
        local
    }

    /// Handles an incoming `gossip/bucket` message, returning the local
    /// bucket snapshot (post-merge) so the peer can reconcile
    /// symmetrically.
    pub fn apply_bucket(&self, msg: BucketMessage) -> Vec<Membership> {
        self.topology.apply_bucket(msg.bucket_id, msg.members);
        self.topology.get_bucket_memberships(msg.bucket_id)
    }
}

pub fn default_gossip_interval_limiter() -> CubicRateLimiter {
    CubicRateLimiter::new(crate::throttling::CubicRateController::new(
        4.0, 0.2, 20.0, 0.7, 0.4,
    ))
}
