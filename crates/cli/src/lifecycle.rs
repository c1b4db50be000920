//! Binds storage, topology, gossip and transport together and drives
//! the node through bootstrap/normal startup into steady-state gossip.

use crate::config::NodeConfig;
use crate::handlers::{BucketHandler, ChecksumsHandler, DrainHandler, JoinHandler, RemoveHandler};
use crate::kv::{DeleteHandler, GetHandler, KvHandlers, PutHandler};
use crate::node_service::NodeService;
use corelib::partitioner::Partitioner;
use replication::gossip::{default_gossip_interval_limiter, Gossiper};
use replication::node_meta::NodeMetaManager;
use replication::topology::TopologyManager;
use std::sync::Arc;
use std::time::Duration;
use storage::backend::redb_backend::RedbStorageFactory;
use storage::{PartitionedStorage, StorageFactory};
use streaming::client::ClientConnectionConfig;
use streaming::server::MessageServerConfig;
use streaming::{ClientConnectionPool, MessageServer, Router, RoutedApplication};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Physical backends are capped well below the partition count so a
/// large `partition_shift` doesn't open one `redb` file per partition.
const MAX_KEYSPACES_PER_BACKEND: u64 = 64;

pub struct LifecycleService {
    node_service: Arc<NodeService>,
    gossiper: Arc<Gossiper<ClientConnectionPool>>,
    pool: Arc<ClientConnectionPool>,
    server: MessageServer,
    bind: std::net::SocketAddr,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
    is_seed: bool,
    #[allow(dead_code)]
    storage: Arc<PartitionedStorage>,
}

impl LifecycleService {
    pub async fn build(config: &NodeConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let backend: Arc<dyn StorageFactory> =
            Arc::new(RedbStorageFactory::new(config.data_dir.clone(), MAX_KEYSPACES_PER_BACKEND)?);
        let system_storage = backend.get(0).await?;
        let partitioner = Partitioner::new(config.partition_shift);
        let storage = Arc::new(PartitionedStorage::new(partitioner, backend, config.node_id.clone()));

        let node_meta = Arc::new(
            NodeMetaManager::load_or_init(system_storage, config.node_id.clone(), config.node_size).await?,
        );
        let topology = Arc::new(TopologyManager::new(config.node_id.clone(), node_meta.incarnation_handle()));

        let cert_pem = std::fs::read(&config.tls_cert)?;
        let key_pem = std::fs::read(&config.tls_key)?;
        let ca_pem = std::fs::read(&config.tls_ca)?;
        let server_tls = streaming::tls::server_tls_config(&cert_pem, &key_pem, &ca_pem)?;
        let client_tls = streaming::tls::client_tls_config(&cert_pem, &key_pem, &ca_pem)?;

        let pool = Arc::new(ClientConnectionPool::new(client_tls, ClientConnectionConfig::default()));
        let gossiper = Arc::new(Gossiper::new(
            config.node_id.clone(),
            topology.clone(),
            pool.clone(),
            default_gossip_interval_limiter(),
        ));

        let address = config.bind.to_string();
        let node_service = Arc::new(NodeService::new(
            node_meta.clone(),
            topology.clone(),
            gossiper.clone(),
            pool.clone(),
            config.seeds.clone(),
            address,
        ));

        let kv = Arc::new(KvHandlers::new(
            storage.clone(),
            topology.clone(),
            partitioner,
            config.node_id.clone(),
        ));

        let mut router = Router::new();
        router.register("gossip/checksums", Arc::new(ChecksumsHandler(node_service.clone())));
        router.register("gossip/bucket", Arc::new(BucketHandler(node_service.clone())));
        router.register("join", Arc::new(JoinHandler(node_service.clone())));
        router.register("drain", Arc::new(DrainHandler(node_service.clone())));
        router.register("remove", Arc::new(RemoveHandler));
        router.register("get", Arc::new(GetHandler(kv.clone())));
        router.register("put", Arc::new(PutHandler(kv.clone())));
        router.register("delete", Arc::new(DeleteHandler(kv.clone())));
        let app = Arc::new(RoutedApplication::new(router));
        let server = MessageServer::new(server_tls, app, MessageServerConfig::default());

        let (stop_tx, stop_rx) = watch::channel(false);

        Ok(Self {
            node_service,
            gossiper,
            pool,
            server,
            bind: config.bind,
            stop_tx,
            stop_rx,
            is_seed: config.is_seed(),
            storage,
        })
    }

    /// Runs until `stop()` is called from another task.
    pub async fn run(self: &Arc<Self>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind).await?;
        info!(bind = %self.bind, "peer server listening");

        let server_task = {
            let this = self.clone();
            let listener = listener;
            let stop_rx = self.stop_rx.clone();
            tokio::spawn(async move { this.server.serve(listener, stop_rx).await })
        };

        let gossip_task = {
            let gossiper = self.gossiper.clone();
            let stop_rx = self.stop_rx.clone();
            let local_membership = self.node_service.local_membership_snapshot().await;
            tokio::spawn(async move { gossiper.gossip_loop(stop_rx, local_membership).await })
        };

        let dispatch_task = {
            let pool = self.pool.clone();
            let stop_rx = self.stop_rx.clone();
            tokio::spawn(async move { pool.dispatch_forever(stop_rx).await })
        };

        if self.is_seed {
            self.node_service.bootstrap_as_seed().await;
        } else {
            self.node_service.join_and_wait_ready(Duration::from_secs(60)).await;
        }

        let _ = server_task.await;
        let _ = gossip_task.await;
        let _ = dispatch_task.await;
        Ok(())
    }

    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        self.pool.close().await;
    }
}
