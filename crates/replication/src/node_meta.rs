//! Persists this node's own identity and membership fields in the
//! `system` keyspace, which (unlike `data`/`index`/`meta`) is never
//! partitioned — there is exactly one copy per node.

use crate::error::{Error, Result};
use corelib::node::{NodeId, NodePhase, NodeSize};
use corelib::token::Token;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use storage::{Storage, Table, WriteOp};

const KEY_NODE_ID: &[u8] = b"node_id";
const KEY_SIZE: &[u8] = b"size";
const KEY_PHASE: &[u8] = b"phase";
const KEY_EPOCH: &[u8] = b"epoch";
const KEY_INCARNATION: &[u8] = b"incarnation";
const KEY_TOKENS: &[u8] = b"tokens";

fn encode_str(s: &str) -> Vec<u8> {
    rmp_serde::to_vec(s).expect("string serialization never fails")
}

fn decode_str(bytes: &[u8]) -> Result<String> {
    rmp_serde::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
}

fn encode_u64(n: u64) -> Vec<u8> {
    rmp_serde::to_vec(&n).expect("u64 serialization never fails")
}

fn decode_u64(bytes: &[u8]) -> Result<u64> {
    rmp_serde::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
}

/// Owns and persists this node's own `phase`/`epoch`/`incarnation`/
/// `tokens`. `incarnation` is kept in an `Arc<AtomicU64>` so
/// `BucketTable` can observe (and defensively advance) it during merge
/// without a callback into this manager.
pub struct NodeMetaManager {
    storage: Arc<dyn Storage>,
    node_id: NodeId,
    size: NodeSize,
    incarnation: Arc<AtomicU64>,
}

impl std::fmt::Debug for NodeMetaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeMetaManager")
            .field("node_id", &self.node_id)
            .field("size", &self.size)
            .field("incarnation", &self.incarnation)
            .finish()
    }
}

impl NodeMetaManager {
    /// On first start, persists `node_id`/`size` from configuration and
    /// initializes `phase = idle`, `epoch = 0`, `incarnation = 0`,
    /// `tokens = []`. On subsequent starts, verifies the persisted
    /// identity matches configuration, failing fatally on mismatch.
    pub async fn load_or_init(
        storage: Arc<dyn Storage>,
        configured_node_id: NodeId,
        configured_size: NodeSize,
    ) -> Result<Self> {
        match storage.get(Table::System, KEY_NODE_ID).await? {
            None => {
                let writes = vec![
                    WriteOp::new(Table::System, KEY_NODE_ID, encode_str(configured_node_id.as_str())),
                    WriteOp::new(Table::System, KEY_SIZE, encode_str(configured_size.as_str())),
                    WriteOp::new(Table::System, KEY_PHASE, encode_str(NodePhase::Idle.as_str())),
                    WriteOp::new(Table::System, KEY_EPOCH, encode_u64(0)),
                    WriteOp::new(Table::System, KEY_INCARNATION, encode_u64(0)),
                    WriteOp::new(Table::System, KEY_TOKENS, rmp_serde::to_vec::<Vec<Vec<u8>>>(&vec![]).unwrap()),
                ];
                storage.put_batch(writes).await?;
                Ok(Self {
                    storage,
                    node_id: configured_node_id,
                    size: configured_size,
                    incarnation: Arc::new(AtomicU64::new(0)),
                })
            }
            Some(persisted_bytes) => {
                let persisted_node_id = decode_str(&persisted_bytes)?;
                if persisted_node_id != configured_node_id.as_str() {
                    return Err(Error::IdentityMismatch {
                        configured: configured_node_id.as_str().to_string(),
                        persisted: persisted_node_id,
                    });
                }
                let persisted_size_bytes = storage
                    .get(Table::System, KEY_SIZE)
                    .await?
                    .ok_or_else(|| Error::CorruptMeta("size".into()))?;
                let persisted_size_str = decode_str(&persisted_size_bytes)?;
                let persisted_size = NodeSize::from_str(&persisted_size_str)
                    .ok_or_else(|| Error::CorruptMeta("size".into()))?;
                if persisted_size != configured_size {
                    return Err(Error::SizeMismatch {
                        configured: configured_size.as_str().to_string(),
                        persisted: persisted_size_str,
                    });
                }
                let incarnation = match storage.get(Table::System, KEY_INCARNATION).await? {
                    Some(b) => decode_u64(&b)?,
                    None => 0,
                };
                Ok(Self {
                    storage,
                    node_id: configured_node_id,
                    size: configured_size,
                    incarnation: Arc::new(AtomicU64::new(incarnation)),
                })
            }
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn size(&self) -> NodeSize {
        self.size
    }

    /// Shared handle so `BucketTable` can read/advance this node's
    /// incarnation counter during merge.
    pub fn incarnation_handle(&self) -> Arc<AtomicU64> {
        self.incarnation.clone()
    }

    pub async fn phase(&self) -> Result<NodePhase> {
        let bytes = self
            .storage
            .get(Table::System, KEY_PHASE)
            .await?
            .ok_or_else(|| Error::CorruptMeta("phase".into()))?;
        NodePhase::from_str(&decode_str(&bytes)?).ok_or_else(|| Error::CorruptMeta("phase".into()))
    }

    pub async fn epoch(&self) -> Result<u64> {
        match self.storage.get(Table::System, KEY_EPOCH).await? {
            Some(b) => decode_u64(&b),
            None => Ok(0),
        }
    }

    pub fn incarnation(&self) -> u64 {
        self.incarnation.load(Ordering::Acquire)
    }

    pub async fn tokens(&self) -> Result<Vec<Token>> {
        match self.storage.get(Table::System, KEY_TOKENS).await? {
            Some(b) => {
                let raw: Vec<Vec<u8>> =
                    rmp_serde::from_slice(&b).map_err(|e| Error::Serialization(e.to_string()))?;
                Ok(corelib::membership::Membership::tokens_from(&raw))
            }
            None => Ok(Vec::new()),
        }
    }

    pub async fn bump_epoch(&self) -> Result<u64> {
        let next = self.epoch().await? + 1;
        self.storage
            .put_batch(vec![WriteOp::new(Table::System, KEY_EPOCH, encode_u64(next))])
            .await?;
        Ok(next)
    }

    pub async fn bump_incarnation(&self) -> Result<u64> {
        let next = self.incarnation.fetch_add(1, Ordering::AcqRel) + 1;
        self.storage
            .put_batch(vec![WriteOp::new(
                Table::System,
                KEY_INCARNATION,
                encode_u64(next),
            )])
            .await?;
        Ok(next)
    }

    pub async fn set_incarnation(&self, n: u64) -> Result<()> {
        self.incarnation.store(n, Ordering::Release);
        self.storage
            .put_batch(vec![WriteOp::new(Table::System, KEY_INCARNATION, encode_u64(n))])
            .await
            .map_err(Error::from)
    }

    pub async fn set_phase(&self, phase: NodePhase) -> Result<()> {
        self.storage
            .put_batch(vec![WriteOp::new(
                Table::System,
                KEY_PHASE,
                encode_str(phase.as_str()),
            )])
            .await
            .map_err(Error::from)
    }

    pub async fn set_tokens(&self, tokens: &[Token]) -> Result<()> {
        let raw: Vec<[u8; 16]> = tokens.iter().map(|t| t.to_be_bytes()).collect();
        let bytes = rmp_serde::to_vec(&raw).map_err(|e| Error::Serialization(e.to_string()))?;
        self.storage
            .put_batch(vec![WriteOp::new(Table::System, KEY_TOKENS, bytes)])
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::backend::redb_backend::RedbStorageFactory;
    use storage::StorageFactory as _;

    async fn fresh_storage() -> Arc<dyn Storage> {
        let dir = tempfile::tempdir().unwrap();
        let factory = RedbStorageFactory::new(dir.path().to_path_buf(), 1).unwrap();
        let s = factory.get(0).await.unwrap();
        std::mem::forget(dir);
        s
    }

    #[tokio::test]
    async fn first_start_initializes_defaults() {
        let storage = fresh_storage().await;
        let meta = NodeMetaManager::load_or_init(storage, NodeId::new("n1"), NodeSize::M)
            .await
            .unwrap();
        assert_eq!(meta.phase().await.unwrap(), NodePhase::Idle);
        assert_eq!(meta.epoch().await.unwrap(), 0);
        assert_eq!(meta.incarnation(), 0);
        assert!(meta.tokens().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subsequent_start_rejects_changed_node_id() {
        let storage = fresh_storage().await;
        NodeMetaManager::load_or_init(storage.clone(), NodeId::new("n1"), NodeSize::M)
            .await
            .unwrap();

        let err = NodeMetaManager::load_or_init(storage, NodeId::new("n2"), NodeSize::M)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IdentityMismatch { .. }));
    }

    #[tokio::test]
    async fn bump_epoch_and_incarnation_persist() {
        let storage = fresh_storage().await;
        let meta = NodeMetaManager::load_or_init(storage.clone(), NodeId::new("n1"), NodeSize::M)
            .await
            .unwrap();
        assert_eq!(meta.bump_epoch().await.unwrap(), 1);
        assert_eq!(meta.bump_incarnation().await.unwrap(), 1);

        let reloaded = NodeMetaManager::load_or_init(storage, NodeId::new("n1"), NodeSize::M)
            .await
            .unwrap();
        assert_eq!(reloaded.epoch().await.unwrap(), 1);
        assert_eq!(reloaded.incarnation(), 1);
    }
}
