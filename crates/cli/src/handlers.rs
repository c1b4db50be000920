//! `MessageHandler` adapters binding `NodeService` into the
//! server-side `Router`.

use crate::node_service::NodeService;
use async_trait::async_trait;
use std::sync::Arc;
use streaming::{Message, MessageHandler};

pub struct ChecksumsHandler(pub Arc<NodeService>);

#[async_trait]
impl MessageHandler for ChecksumsHandler {
    async fn handle(&self, data: serde_json::Value) -> Result<Message, String> {
        self.0.apply_checksums(data).await
    }
}

pub struct BucketHandler(pub Arc<NodeService>);

#[async_trait]
impl MessageHandler for BucketHandler {
    async fn handle(&self, data: serde_json::Value) -> Result<Message, String> {
        self.0.apply_bucket(data).await
    }
}

pub struct JoinHandler(pub Arc<NodeService>);

#[async_trait]
impl MessageHandler for JoinHandler {
    async fn handle(&self, _data: serde_json::Value) -> Result<Message, String> {
        Ok(self.0.join().await)
    }
}

pub struct DrainHandler(pub Arc<NodeService>);

#[async_trait]
impl MessageHandler for DrainHandler {
    async fn handle(&self, _data: serde_json::Value) -> Result<Message, String> {
        Ok(self.0.drain().await)
    }
}

pub struct RemoveHandler;

#[async_trait]
impl MessageHandler for RemoveHandler {
    async fn handle(&self, _data: serde_json::Value) -> Result<Message, String> {
        Err("remove is an offline operation; run it against a stopped node's data directory".to_string())
    }
}
