//! Two-phase convergence on a coherent cluster snapshot when joining
//! through a seed set: a view phase establishes which incarnation the
//! cluster has settled on, then a membership phase fetches every
//! bucket from a chosen seed.

use crate::config::Seed;
use corelib::membership::Membership;
use corelib::node::NodeId;
use replication::gossip::{BucketMessage, ChecksumsMessage};
use replication::throttling::ExponentialBackoff;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use streaming::ClientConnectionPool;

const VIEW_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_BUCKET_RETRIES: u32 = 5;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no seeds configured")]
    NoSeeds,
    #[error("join failed: {0}")]
    Failed(String),
}

struct CoherentView {
    address: String,
    checksums: HashMap<u32, u32>,
}

pub struct SeedBootstrapper {
    local_node_id: NodeId,
    local_membership: Membership,
    seeds: Vec<Seed>,
    pool: Arc<ClientConnectionPool>,
    max_inc_delta: u64,
}

impl SeedBootstrapper {
    pub fn new(local_membership: Membership, seeds: Vec<Seed>, pool: Arc<ClientConnectionPool>) -> Self {
        Self {
            local_node_id: local_membership.node_id.clone(),
            local_membership,
            seeds,
            pool,
            max_inc_delta: 3,
        }
    }

    pub async fn bootstrap(&self) -> Result<Vec<Membership>, Error> {
        let others: Vec<&Seed> = self.seeds.iter().filter(|s| s.node_id != self.local_node_id).collect();
        if others.is_empty() {
            return Err(Error::NoSeeds);
        }
        for seed in &others {
            self.pool.register(seed.node_id.clone(), seed.address.clone());
        }

        let view = self.bootstrap_view(&others).await;
        self.bootstrap_memberships(&view).await
    }

    /// Retries indefinitely with backoff until a quorum of seeds agree
    /// (within `max_inc_delta`) on the dominant incarnation.
    async fn bootstrap_view(&self, seeds: &[&Seed]) -> CoherentView {
        let quorum = seeds.len() / 2 + 1;
        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(200),
            2.0,
            Duration::from_secs(10),
            Duration::from_millis(200),
        );

        loop {
            let msg = serde_json::to_value(ChecksumsMessage {
                source: self.local_membership.clone(),
                checksums: HashMap::new(),
            })
            .expect("ChecksumsMessage always serializes");
            let mut views: HashMap<NodeId, (u64, HashMap<u32, u32>, String)> = HashMap::new();

            for seed in seeds {
                let reply = tokio::time::timeout(
                    VIEW_TIMEOUT,
                    self.pool
                        .request(&seed.node_id, streaming::Message::new("gossip/checksums", msg.clone())),
                )
                .await;
                if let Ok(Ok(reply)) = reply {
                    if let Ok(remote) = serde_json::from_value::<ChecksumsMessage>(reply.data) {
                        views.insert(
                            seed.node_id.clone(),
                            (remote.source.incarnation, remote.checksums, seed.address.clone()),
                        );
                    }
                }
            }

            if let Some(view) = dominant_coherent_view(&views, quorum, self.max_inc_delta) {
                return view;
            }

            tokio::time::sleep(backoff.next()).await;
        }
    }

    /// Retries each missing bucket indefinitely (bounded per-attempt by
    /// `MAX_BUCKET_RETRIES`) until every non-empty bucket named by the
    /// view has been fetched.
    async fn bootstrap_memberships(&self, view: &CoherentView) -> Result<Vec<Membership>, Error> {
        let seed_node_id = self
            .seeds
            .iter()
            .find(|s| s.address == view.address)
            .map(|s| s.node_id.clone())
            .ok_or_else(|| Error::Failed("chosen seed dropped out of the seed list".into()))?;

        let mut satisfied: HashMap<u32, Vec<Membership>> = HashMap::new();
        let pending: Vec<u32> = view.checksums.iter().filter(|(_, crc)| **crc != 0).map(|(id, _)| *id).collect();

        let mut backoff = ExponentialBackoff::new(
            Duration::from_millis(200),
            2.0,
            Duration::from_secs(10),
            Duration::from_millis(200),
        );

        for bucket_id in pending {
            let mut attempts = 0;
            loop {
                let request = BucketMessage {
                    bucket_id,
                    members: Vec::new(),
                };
                let payload = serde_json::to_value(request).expect("BucketMessage always serializes");
                match self
                    .pool
                    .request(&seed_node_id, streaming::Message::new("gossip/bucket", payload))
                    .await
                {
                    Ok(reply) => {
                        if let Ok(remote) = serde_json::from_value::<BucketMessage>(reply.data) {
                            satisfied.insert(bucket_id, remote.members);
                            break;
                        }
                    }
                    Err(_) if attempts < MAX_BUCKET_RETRIES => {
                        attempts += 1;
                        tokio::time::sleep(backoff.next()).await;
                        continue;
                    }
                    Err(e) => return Err(Error::Failed(e.to_string())),
                }
            }
            backoff.reset();
        }

        Ok(satisfied.into_values().flatten().collect())
    }
}

fn dominant_coherent_view(
    views: &HashMap<NodeId, (u64, HashMap<u32, u32>, String)>,
    quorum: usize,
    max_inc_delta: u64,
) -> Option<CoherentView> {
    if views.is_empty() {
        return None;
    }
    let dominant_incarnation = views.values().map(|(inc, _, _)| *inc).max()?;
    let agreeing: Vec<_> = views
        .values()
        .filter(|(inc, _, _)| dominant_incarnation.saturating_sub(*inc) <= max_inc_delta)
        .collect();
    if agreeing.len() < quorum {
        return None;
    }
    let (_, checksums, address) = agreeing
        .iter()
        .max_by_key(|(inc, _, _)| *inc)
        .expect("agreeing is non-empty");
    Some(CoherentView {
        address: address.clone(),
        checksums: checksums.clone(),
    })
}
