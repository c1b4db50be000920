//! Client-facing `get`/`put`/`delete` handlers. Each checks ownership
//! of the key's partition against the current ring before touching
//! storage; a node that isn't the current owner replies `ko` rather
//! than serving a possibly-stale read or an unreplicated write.

use async_trait::async_trait;
use corelib::node::NodeId;
use corelib::partitioner::Partitioner;
use replication::topology::TopologyManager;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::PartitionedStorage;
use streaming::{Message, MessageHandler};

#[derive(Deserialize)]
struct KeyRequest {
    key: Vec<u8>,
}

#[derive(Deserialize)]
struct PutRequest {
    key: Vec<u8>,
    value: Vec<u8>,
}

#[derive(Serialize)]
struct KeyValueResponse {
    key: Vec<u8>,
    value: Option<Vec<u8>>,
}

#[derive(Serialize)]
struct KeyResponse {
    key: Vec<u8>,
}

pub struct KvHandlers {
    storage: Arc<PartitionedStorage>,
    topology: Arc<TopologyManager>,
    partitioner: Partitioner,
    local_node_id: NodeId,
}

impl KvHandlers {
    pub fn new(
        storage: Arc<PartitionedStorage>,
        topology: Arc<TopologyManager>,
        partitioner: Partitioner,
        local_node_id: NodeId,
    ) -> Self {
        Self {
            storage,
            topology,
            partitioner,
            local_node_id,
        }
    }

    fn owns(&self, key: &[u8]) -> bool {
        let ring = self.topology.get_ring();
        match self.partitioner.find_placement_by_key(key, &ring) {
            Some(placement) => placement.vnode.node_id == self.local_node_id,
            None => false,
        }
    }

    fn not_owner_ko(&self, key: &[u8]) -> Message {
        Message::new(
            "ko",
            serde_json::json!({
                "message": "this node does not own the requested key",
                "key": key,
            }),
        )
    }
}

pub struct GetHandler(pub Arc<KvHandlers>);

#[async_trait]
impl MessageHandler for GetHandler {
    async fn handle(&self, data: serde_json::Value) -> Result<Message, String> {
        let req: KeyRequest = serde_json::from_value(data).map_err(|e| e.to_string())?;
        let kv = &self.0;
        if !kv.owns(&req.key) {
            return Ok(kv.not_owner_ko(&req.key));
        }
        let value = kv.storage.get(&req.key).await.map_err(|e| e.to_string())?;
        let reply = KeyValueResponse { key: req.key, value };
        serde_json::to_value(reply).map(Message::ok).map_err(|e| e.to_string())
    }
}

pub struct PutHandler(pub Arc<KvHandlers>);

#[async_trait]
impl MessageHandler for PutHandler {
    async fn handle(&self, data: serde_json::Value) -> Result<Message, String> {
        let req: PutRequest = serde_json::from_value(data).map_err(|e| e.to_string())?;
        let kv = &self.0;
        if !kv.owns(&req.key) {
            return Ok(kv.not_owner_ko(&req.key));
        }
        kv.storage.put(&req.key, &req.value).await.map_err(|e| e.to_string())?;
        let reply = KeyResponse { key: req.key };
        serde_json::to_value(reply).map(Message::ok).map_err(|e| e.to_string())
    }
}

pub struct DeleteHandler(pub Arc<KvHandlers>);

#[async_trait]
impl MessageHandler for DeleteHandler {
    async fn handle(&self, data: serde_json::Value) -> Result<Message, String> {
        let req: KeyRequest = serde_json::from_value(data).map_err(|e| e.to_string())?;
        let kv = &self.0;
        if !kv.owns(&req.key) {
            return Ok(kv.not_owner_ko(&req.key));
        }
        kv.storage.delete(&req.key).await.map_err(|e| e.to_string())?;
        let reply = KeyResponse { key: req.key };
        serde_json::to_value(reply).map(Message::ok).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::membership::Membership;
    use corelib::node::{NodePhase, NodeSize};
    use corelib::token::Token;
    use std::sync::atomic::AtomicU64;
    use storage::backend::redb_backend::RedbStorageFactory;

    fn fixture(owns_everything: bool) -> KvHandlers {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(RedbStorageFactory::new(dir.path().to_path_buf(), 1).unwrap());
        std::mem::forget(dir);
        let local = NodeId::new("local");
        let partitioner = Partitioner::new(4);
        let storage = Arc::new(PartitionedStorage::new(partitioner, backend, local.clone()));
        let topology = Arc::new(TopologyManager::new(local.clone(), Arc::new(AtomicU64::new(0))));
        if owns_everything {
            let tokens = Token::generate_tokens(local.as_str(), 32);
            topology.add_membership(Membership {
                node_id: local.clone(),
                address: "127.0.0.1:9000".into(),
                size: NodeSize::Xxl,
                phase: NodePhase::Ready,
                epoch: 0,
                incarnation: 0,
                tokens,
            });
        }
        KvHandlers::new(storage, topology, partitioner, local)
    }

    #[tokio::test]
    async fn get_on_unowned_key_is_not_served() {
        let kv = Arc::new(fixture(false));
        let handler = GetHandler(kv);
        let reply = handler
            .handle(serde_json::json!({"key": [1u8, 2, 3]}))
            .await
            .unwrap();
        assert_eq!(reply.msg_type, "ko");
    }

    #[tokio::test]
    async fn put_then_get_round_trips_when_local_node_owns_everything() {
        let kv = Arc::new(fixture(true));
        let put = PutHandler(kv.clone());
        let reply = put
            .handle(serde_json::json!({"key": [1u8, 2, 3], "value": [9u8, 9, 9]}))
            .await
            .unwrap();
        assert_eq!(reply.msg_type, "ok");

        let get = GetHandler(kv);
        let reply = get.handle(serde_json::json!({"key": [1u8, 2, 3]})).await.unwrap();
        assert_eq!(reply.msg_type, "ok");
        assert_eq!(reply.data["value"], serde_json::json!([9, 9, 9]));
    }

    #[tokio::test]
    async fn delete_removes_the_key() {
        let kv = Arc::new(fixture(true));
        PutHandler(kv.clone())
            .handle(serde_json::json!({"key": [5u8], "value": [6u8]}))
            .await
            .unwrap();
        let reply = DeleteHandler(kv.clone())
            .handle(serde_json::json!({"key": [5u8]}))
            .await
            .unwrap();
        assert_eq!(reply.msg_type, "ok");
        let reply = GetHandler(kv).handle(serde_json::json!({"key": [5u8]})).await.unwrap();
        assert_eq!(reply.data["value"], serde_json::Value::Null);
    }
}
