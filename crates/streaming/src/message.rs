//! Wire message: `{type, data}`, MessagePack-serialized, with a
//! request id threaded through `data` for request/response matching.

use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub data: serde_json::Value,
}

impl Message {
    pub fn new(msg_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
        }
    }

    /// Synthesized response for a malformed frame or a handler that
    /// returned nothing: never closes the connection on its own.
    pub fn ko(reason: impl Into<String>) -> Self {
        Self::new("ko", json!({ "error": reason.into() }))
    }

    pub fn ok(data: serde_json::Value) -> Self {
        Self::new("ok", data)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.data.get("request_id").and_then(|v| v.as_str())
    }

    /// Returns a copy with `data.request_id` set if absent, generating
    /// one otherwise.
    pub fn with_request_id(mut self, generate: impl FnOnce() -> String) -> Self {
        if self.request_id().is_none() {
            if let serde_json::Value::Object(map) = &mut self.data {
                map.insert("request_id".to_string(), json!(generate()));
            } else {
                let mut map = serde_json::Map::new();
                map.insert("request_id".to_string(), json!(generate()));
                map.insert("value".to_string(), self.data.clone());
                self.data = serde_json::Value::Object(map);
            }
        }
        self
    }

    pub fn encode(&self) -> crate::error::Result<Vec<u8>> {
        rmp_serde::to_vec_named(self).map_err(|e| crate::error::Error::Serialization(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> crate::error::Result<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| crate::error::Error::Serialization(e.to_string()))
    }
}
