//! Node orchestration: TCP transport, discovery and synchronization services

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use fugue_crypto::PrivateKey;
use fugue_network::{
    BackgroundServices, Inbox, MessageValidator, NetworkError, Peer,
    PeerExplorer, RefreshTableTask, ReplacementCacheTask, RoutingTable, TcpTransport, Transport,
};
use fugue_sync::{SyncConfig, Synchronizer};
use fugue_types::{Blockchain, Evidence, MemoryChain, MemoryPool, Subscription, Transaction};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigError, NodeConfig};

/// Node error types
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    /// Network error
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// `run` called twice
    #[error("node is already running")]
    AlreadyRunning,
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;

/// A synchronizing Fugue node
pub struct Node {
    config: NodeConfig,
    transport: Arc<TcpTransport>,
    validator: Arc<MessageValidator>,
    explorer: Arc<PeerExplorer>,
    sync: Arc<Synchronizer>,
    services: BackgroundServices,
    listener: Mutex<Option<TcpListener>>,
    cancel: CancellationToken,
    _version_watch: Subscription,
}

impl Node {
    /// Bind the listener and build every service. Nothing runs until
    /// [`Node::run`].
    pub async fn new(config: NodeConfig) -> NodeResult<Self> {
        let key = config.p2p.key()?;
        let listener = TcpListener::bind(config.p2p.listen_addr).await?;
        let public = config.p2p.public_addr.unwrap_or(listener.local_addr()?);

        let (transport, validator) = Self::transport(&config, key, public)?;
        let version_watch = validator.on_different_version(|diff| {
            tracing::warn!(
                peer = %diff.peer,
                local = diff.local.version,
                remote = diff.remote.version,
                "Peer runs a different protocol version"
            );
        });

        let chain: Arc<MemoryChain> = Arc::new(MemoryChain::new(config.genesis.block()?));
        let transactions: Arc<MemoryPool<Transaction>> = Arc::new(MemoryPool::new());
        let evidence: Arc<MemoryPool<Evidence>> = Arc::new(MemoryPool::new());

        let table = Arc::new(RoutingTable::with_defaults(transport.local_peer().address));
        let explorer = Arc::new(PeerExplorer::new(
            table,
            transport.clone(),
            config.discovery.explorer_config(),
        ));
        let sync = Synchronizer::new(
            chain,
            transactions,
            evidence,
            Arc::clone(&explorer),
            SyncConfig::from(&config.sync),
        );

        let mut services = sync.services();
        let discovery = &config.discovery;
        services.push(Arc::new(RefreshTableTask::new(
            Arc::clone(&explorer),
            Duration::from_millis(discovery.refresh_interval_ms),
            Duration::from_millis(discovery.stale_threshold_ms),
        )));
        services.push(Arc::new(ReplacementCacheTask::new(
            Arc::clone(&explorer),
            Duration::from_millis(discovery.replacement_interval_ms),
        )));

        Ok(Self {
            config,
            transport,
            validator,
            explorer,
            sync,
            services,
            listener: Mutex::new(Some(listener)),
            cancel: CancellationToken::new(),
            _version_watch: version_watch,
        })
    }

    fn transport(
        config: &NodeConfig,
        key: PrivateKey,
        public: SocketAddr,
    ) -> NodeResult<(Arc<TcpTransport>, Arc<MessageValidator>)> {
        let protocol = config.p2p.app_protocol_version()?;
        if config.p2p.app_protocol_version.is_none() {
            tracing::warn!(
                version = protocol.version,
                "No app_protocol_version configured, using the development issuer"
            );
        }
        let validator = Arc::new(MessageValidator::new(
            protocol.clone(),
            config.p2p.validator_config()?,
        ));
        let transport = Arc::new(TcpTransport::new(key, public, protocol, Arc::clone(&validator)));
        Ok((transport, validator))
    }

    /// This node as peers see it
    pub fn local_peer(&self) -> Peer {
        self.transport.local_peer()
    }

    /// Discovery
    pub fn explorer(&self) -> &Arc<PeerExplorer> {
        &self.explorer
    }

    /// Synchronization services
    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.sync
    }

    /// Serve, explore from the seeds, and sync until [`Node::stop`].
    pub async fn run(&self) -> NodeResult<()> {
        let listener = self.listener.lock().await.take().ok_or(NodeError::AlreadyRunning)?;
        let inbox = Inbox::new(Arc::clone(&self.validator), self.sync.handler());
        let server = tokio::spawn(Arc::clone(&self.transport).serve(
            listener,
            inbox,
            self.cancel.clone(),
        ));

        let tip = self.sync.chain().tip();
        tracing::info!(
            peer = %self.local_peer(),
            height = tip.height,
            hash = %tip.hash.short(),
            "Fugue node started"
        );

        let seeds = self.config.p2p.seed_peers()?;
        if !seeds.is_empty() {
            let depth = self.config.discovery.max_depth;
            match self.explorer.explore(&seeds, depth, &self.cancel).await {
                Ok(()) => tracing::info!(peers = self.explorer.peers().len(), "Bootstrap finished"),
                Err(e) => tracing::warn!(error = %e, "Bootstrap failed"),
            }
        }
        self.sync.block_sync().broadcast_tip(None);

        self.services.start_all()?;
        self.cancel.cancelled().await;

        self.services.stop_all().await;
        if let Err(e) = server.await {
            tracing::warn!(error = %e, "P2P listener task failed");
        }
        tracing::info!("Fugue node stopped");
        Ok(())
    }

    /// Ask [`Node::run`] to return
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
