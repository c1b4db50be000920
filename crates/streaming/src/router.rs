//! `message.type -> async handler` dispatch for the default
//! [`RoutedApplication`].

use crate::message::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// A single-type handler: receives `message.data` and produces the
/// response body. `Err` is treated as an application-level exception
/// and rendered as a `ko` message, never a panic.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, data: serde_json::Value) -> Result<Message, String>;
}

#[derive(Default)]
pub struct Router {
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, msg_type: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(msg_type.into(), handler);
    }

    pub fn resolve(&self, msg_type: &str) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(msg_type).cloned()
    }
}

/// `app(receive, send)` driven by a [`Router`]: resolves a handler by
/// `message.type`, stamps `data.request_id` if absent, and always
/// produces a response (falling back to `ko`).
pub struct RoutedApplication {
    router: Router,
}

impl RoutedApplication {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    pub async fn dispatch(&self, msg: Message, request_id: impl FnOnce() -> String) -> Message {
        let msg = msg.with_request_id(request_id);
        match self.router.resolve(&msg.msg_type) {
            Some(handler) => match handler.handle(msg.data).await {
                Ok(response) => response,
                Err(reason) => Message::ko(reason),
            },
            None => Message::ko(format!("no handler for type {:?}", msg.msg_type)),
        }
    }
}
