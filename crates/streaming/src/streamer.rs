//! Runs the configured [`RoutedApplication`] over a connection's
//! inbound/outbound message queues, observing [`FlowControl`] on send.

use crate::error::{Error, Result};
use crate::flow_control::FlowControl;
use crate::message::Message;
use crate::router::RoutedApplication;
use std::sync::Arc;
use tokio::sync::mpsc;

/// `None` on the inbound channel is the terminal sentinel pushed by
/// `Protocol` on connection loss.
pub struct Streamer {
    inbound: mpsc::Receiver<Option<Message>>,
    outbound: mpsc::Sender<Message>,
    flow_control: Arc<FlowControl>,
}

impl Streamer {
    pub fn new(
        inbound: mpsc::Receiver<Option<Message>>,
        outbound: mpsc::Sender<Message>,
        flow_control: Arc<FlowControl>,
    ) -> Self {
        Self {
            inbound,
            outbound,
            flow_control,
        }
    }

    /// Awaits the next Message, or `None` once the connection is gone.
    pub async fn receive(&mut self) -> Option<Message> {
        self.inbound.recv().await.flatten()
    }

    pub async fn send(&self, msg: Message) -> Result<()> {
        self.flow_control.drain().await;
        self.outbound.send(msg).await.map_err(|_| Error::ConnectionClosed)
    }

    /// Drives `app` until the connection terminates.
    pub async fn run(&mut self, app: &RoutedApplication, request_id: impl Fn() -> String) {
        while let Some(msg) = self.receive().await {
            let response = app.dispatch(msg, &request_id).await;
            if self.send(response).await.is_err() {
                return;
            }
        }
    }
}
