//! Persistent client connections, keyed by `node_id`, with
//! reconnect-with-backoff and a shared [`Subscription`] that received
//! messages are published onto.
//!
//! [`ClientConnectionPool`] also implements
//! [`replication::gossip::GossipTransport`], which is how the
//! gossip crate's merge logic gets wired to a live network without
//! depending on it directly.

use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::{Decoded, Protocol, ProtocolConfig};
use crate::router::MessageHandler;
use crate::subscription::Subscription;
use async_trait::async_trait;
use corelib::node::NodeId;
use dashmap::DashMap;
use parking_lot::Mutex as SyncMutex;
use replication::gossip::{BucketMessage, ChecksumsMessage, GossipTransport, TransportError};
use replication::throttling::ExponentialBackoff;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio_rustls::TlsConnector;

#[derive(Clone)]
pub struct ClientConnectionConfig {
    pub max_retries: u32,
    pub backoff_initial: Duration,
    pub backoff_factor: f64,
    pub backoff_max: Duration,
    pub backoff_jitter: Duration,
    pub max_message_size: u32,
    pub max_buffer_size: usize,
    pub request_timeout: Duration,
}

impl Default for ClientConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff_initial: Duration::from_millis(100),
            backoff_factor: 2.0,
            backoff_max: Duration::from_secs(30),
            backoff_jitter: Duration::from_millis(250),
            max_message_size: ProtocolConfig::default().max_message_size,
            max_buffer_size: ProtocolConfig::default().max_buffer_size,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// A persistent connection to one peer. Reconnects lazily on `send`
/// unless `close()`d, in which case reconnection is permanently
/// suppressed.
pub struct ClientConnection {
    address: SyncMutex<String>,
    tls_config: Arc<ClientConfig>,
    subscription: Arc<Subscription>,
    config: ClientConnectionConfig,
    outbound: AsyncMutex<Option<mpsc::Sender<Message>>>,
    closed: AtomicBool,
}

impl ClientConnection {
    pub fn new(address: String, tls_config: Arc<ClientConfig>, subscription: Arc<Subscription>, config: ClientConnectionConfig) -> Self {
        Self {
            address: SyncMutex::new(address),
            tls_config,
            subscription,
            config,
            outbound: AsyncMutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn set_address(&self, address: String) {
        *self.address.lock() = address;
    }

    /// Establishes the connection if not already connected, retrying
    /// with exponential backoff up to `max_retries`.
    pub async fn connect(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::PoolStopped);
        }
        let mut outbound = self.outbound.lock().await;
        if outbound.is_some() {
            return Ok(());
        }

        let address = self.address.lock().clone();
        let mut backoff = ExponentialBackoff::new(
            self.config.backoff_initial,
            self.config.backoff_factor,
            self.config.backoff_max,
            self.config.backoff_jitter,
        );

        let mut attempt = 0;
        let stream = loop {
            match self.dial(&address).await {
                Ok(stream) => break stream,
                Err(_) if attempt < self.config.max_retries => {
                    attempt += 1;
                    tokio::time::sleep(backoff.next()).await;
                }
                Err(e) => return Err(e),
            }
        };

        let (out_tx, out_rx) = mpsc::channel::<Message>(64);
        let subscription = self.subscription.clone();
        let max_message_size = self.config.max_message_size;
        let max_buffer_size = self.config.max_buffer_size;
        tokio::spawn(run_connection(stream, out_rx, subscription, max_message_size, max_buffer_size));

        *outbound = Some(out_tx);
        Ok(())
    }

    async fn dial(&self, address: &str) -> Result<tokio_rustls::client::TlsStream<TcpStream>> {
        let tcp = TcpStream::connect(address).await?;
        let connector = TlsConnector::from(self.tls_config.clone());
        let host = address.split(':').next().unwrap_or(address).to_string();
        let server_name = ServerName::try_from(host).map_err(|e| Error::Tls(e.to_string()))?;
        connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| Error::Tls(e.to_string()))
    }

    pub async fn send(&self, msg: Message) -> Result<()> {
        self.connect().await?;
        let outbound = self.outbound.lock().await;
        match outbound.as_ref() {
            Some(sender) => sender.send(msg).await.map_err(|_| Error::ConnectionClosed),
            None => Err(Error::ConnectionClosed),
        }
    }

    /// Marks the connection disconnected; the next `send` reconnects.
    pub async fn mark_disconnected(&self) {
        *self.outbound.lock().await = None;
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        *self.outbound.lock().await = None;
    }
}

async fn run_connection<S>(stream: S, mut outbound: mpsc::Receiver<Message>, subscription: Arc<Subscription>, max_message_size: u32, max_buffer_size: usize)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let Ok(framed) = Protocol::encode_frame(&msg) else {
                continue;
            };
            if writer.write_all(&framed).await.is_err() {
                break;
            }
        }
    });

    let mut protocol = Protocol::new(ProtocolConfig {
        max_message_size,
        max_buffer_size,
    });
    let mut buf = [0u8; 8192];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        if protocol.feed(&buf[..n]).is_err() {
            break;
        }
        loop {
            match protocol.decode_next() {
                Ok(Decoded::Message(msg)) => subscription.publish(msg),
                Ok(Decoded::Invalid) => subscription.publish(Message::ko("Invalid frame format")),
                Ok(Decoded::NeedMore) => break,
                Err(_) => return,
            }
        }
    }
    let _ = writer_task.await;
}

/// Pool of [`ClientConnection`]s keyed by `node_id`, plus request/reply
/// correlation over the shared [`Subscription`] by `data.request_id`.
pub struct ClientConnectionPool {
    tls_config: Arc<ClientConfig>,
    config: ClientConnectionConfig,
    connections: DashMap<NodeId, Arc<ClientConnection>>,
    addresses: DashMap<NodeId, String>,
    subscription: Arc<Subscription>,
    type_handlers: DashMap<String, Vec<Arc<dyn MessageHandler>>>,
    pending: DashMap<String, oneshot::Sender<Message>>,
    stopped: AtomicBool,
}

impl ClientConnectionPool {
    pub fn new(tls_config: Arc<ClientConfig>, config: ClientConnectionConfig) -> Self {
        Self {
            tls_config,
            config,
            connections: DashMap::new(),
            addresses: DashMap::new(),
            subscription: Arc::new(Subscription::new()),
            type_handlers: DashMap::new(),
            pending: DashMap::new(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Registers (or re-registers) a peer's address. If the address
    /// changed, the existing connection is dropped so the next
    /// `get`/`send` rebuilds it against the new address.
    pub fn register(&self, node_id: NodeId, address: String) {
        let changed = self
            .addresses
            .get(&node_id)
            .map(|existing| *existing != address)
            .unwrap_or(true);
        self.addresses.insert(node_id.clone(), address.clone());
        if changed {
            if let Some((_, conn)) = self.connections.remove(&node_id) {
                let conn = conn.clone();
                tokio::spawn(async move { conn.close().await });
            }
        }
    }

    pub fn get(&self, node_id: &NodeId) -> Result<Arc<ClientConnection>> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::PoolStopped);
        }
        let Some(address) = self.addresses.get(node_id).map(|a| a.clone()) else {
            return Err(Error::NotRegistered(node_id.to_string()));
        };
        if let Some(existing) = self.connections.get(node_id) {
            return Ok(existing.clone());
        }
        let conn = Arc::new(ClientConnection::new(
            address,
            self.tls_config.clone(),
            self.subscription.clone(),
            self.config.clone(),
        ));
        self.connections.insert(node_id.clone(), conn.clone());
        Ok(conn)
    }

    pub async fn send(&self, node_id: &NodeId, msg: Message) -> Result<()> {
        self.get(node_id)?.send(msg).await
    }

    /// Sends `msg` and awaits the reply correlated by `data.request_id`.
    /// Used both by the `GossipTransport` impl below and by the `cli`
    /// crate's `SeedBootstrapper`.
    pub async fn request(&self, node_id: &NodeId, msg: Message) -> Result<Message> {
        let request_id = format!("{:032x}", rand::random::<u128>());
        let msg = msg.with_request_id(|| request_id.clone());
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let result = async {
            self.send(node_id, msg).await?;
            tokio::time::timeout(self.config.request_timeout, rx)
                .await
                .map_err(|_| Error::ConnectionClosed)?
                .map_err(|_| Error::ConnectionClosed)
        }
        .await;

        self.pending.remove(&request_id);
        result
    }

    pub fn subscribe(&self, msg_type: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.type_handlers.entry(msg_type.into()).or_default().push(handler);
    }

    /// Consumes the shared Subscription forever: replies matching a
    /// pending request are routed there, everything else fans out to
    /// registered type handlers concurrently. Stops on a terminal
    /// sentinel or `stop`.
    pub async fn dispatch_forever(&self, mut stop: watch::Receiver<bool>) {
        loop {
            let rx = self.subscription.subscribe();
            let msg = tokio::select! {
                msg = rx => match msg {
                    Ok(msg) => msg,
                    Err(_) => continue,
                },
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return;
                    }
                    continue;
                }
            };

            if msg.msg_type == "__terminal__" {
                return;
            }

            if let Some(request_id) = msg.request_id() {
                if let Some((_, sender)) = self.pending.remove(request_id) {
                    let _ = sender.send(msg);
                    continue;
                }
            }

            if let Some(handlers) = self.type_handlers.get(&msg.msg_type) {
                for handler in handlers.value().clone() {
                    let data = msg.data.clone();
                    tokio::spawn(async move {
                        let _ = handler.handle(data).await;
                    });
                }
            }
        }
    }

    pub async fn close(&self) {
        self.stopped.store(true, Ordering::Release);
        self.subscription.publish(Message::new("__terminal__", serde_json::json!({})));
        for entry in self.connections.iter() {
            entry.value().close().await;
        }
        self.connections.clear();
        self.addresses.clear();
    }
}

#[async_trait]
impl GossipTransport for ClientConnectionPool {
    async fn register(&self, node_id: &NodeId, address: &str) {
        ClientConnectionPool::register(self, node_id.clone(), address.to_string());
    }

    async fn send_checksums(&self, node_id: &NodeId, msg: ChecksumsMessage) -> std::result::Result<ChecksumsMessage, TransportError> {
        let payload = serde_json::to_value(&msg).map_err(|e| TransportError::Other(e.to_string()))?;
        let reply = self
            .request(node_id, Message::new("gossip/checksums", payload))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;
        serde_json::from_value(reply.data).map_err(|e| TransportError::Other(e.to_string()))
    }

    async fn send_bucket(&self, node_id: &NodeId, address: &str, msg: BucketMessage) -> std::result::Result<BucketMessage, TransportError> {
        ClientConnectionPool::register(self, node_id.clone(), address.to_string());
        let payload = serde_json::to_value(&msg).map_err(|e| TransportError::Other(e.to_string()))?;
        let reply = self
            .request(node_id, Message::new("gossip/bucket", payload))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;
        serde_json::from_value(reply.data).map_err(|e| TransportError::Other(e.to_string()))
    }
}
