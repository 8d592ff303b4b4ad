//! Wiring of every synchronization service over one explorer

use std::sync::Arc;

use fugue_network::{BackgroundServices, PeerExplorer};
use fugue_types::{Blockchain, ContentPool, Evidence, Subscription, Transaction};
use tracing::debug;

use crate::block_sync::{BlockSync, BlockSyncTask};
use crate::broadcaster::{BroadcastTask, Broadcaster};
use crate::config::SyncConfig;
use crate::content_sync::{ContentSync, ContentSyncTask};
use crate::event::SyncEvent;
use crate::fetcher::{EvidenceFetcher, Fetcher, TxFetcher};
use crate::gossip::ConsensusGossip;
use crate::handler::SyncHandler;
use crate::metrics::SyncMetrics;

/// Block, transaction, evidence and consensus synchronization for one node.
///
/// Owns the per-kind services and the subscriptions linking them to the
/// pools. [`Synchronizer::services`] yields the periodic loops and
/// [`Synchronizer::handler`] the inbound side.
pub struct Synchronizer {
    chain: Arc<dyn Blockchain>,
    transactions: Arc<dyn ContentPool<Transaction>>,
    evidence: Arc<dyn ContentPool<Evidence>>,
    explorer: Arc<PeerExplorer>,
    config: SyncConfig,
    block_sync: Arc<BlockSync>,
    tx_sync: Arc<ContentSync<TxFetcher>>,
    evidence_sync: Arc<ContentSync<EvidenceFetcher>>,
    tx_broadcaster: Arc<Broadcaster>,
    evidence_broadcaster: Arc<Broadcaster>,
    gossip: Arc<ConsensusGossip>,
    metrics: Arc<SyncMetrics>,
    _subscriptions: Vec<Subscription>,
}

impl Synchronizer {
    /// Build every service around the local chain and pools.
    pub fn new(
        chain: Arc<dyn Blockchain>,
        transactions: Arc<dyn ContentPool<Transaction>>,
        evidence: Arc<dyn ContentPool<Evidence>>,
        explorer: Arc<PeerExplorer>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let transport = Arc::clone(explorer.transport());
        let block_sync = BlockSync::new(Arc::clone(&chain), Arc::clone(&explorer), config.clone());

        let tx_broadcaster = Broadcaster::transactions(Arc::clone(&explorer));
        let tx_sync = Arc::new(ContentSync::new(
            Fetcher::new(
                TxFetcher::new(Arc::clone(&chain), Arc::clone(&transactions)),
                Arc::clone(&transport),
                config.fetch_timeout,
            ),
            config.content_demand_lifespan,
            Some(Arc::clone(&tx_broadcaster)),
        ));

        let evidence_broadcaster = Broadcaster::evidence(Arc::clone(&explorer));
        let evidence_sync = Arc::new(ContentSync::new(
            Fetcher::new(
                EvidenceFetcher::new(Arc::clone(&chain), Arc::clone(&evidence)),
                transport,
                config.fetch_timeout,
            ),
            config.content_demand_lifespan,
            Some(Arc::clone(&evidence_broadcaster)),
        ));

        let gossip = ConsensusGossip::new(Arc::clone(&explorer), &config);
        let metrics = SyncMetrics::new();

        let mut subscriptions = vec![
            tx_broadcaster.attach::<Transaction>(transactions.as_ref()),
            evidence_broadcaster.attach::<Evidence>(evidence.as_ref()),
            metrics.attach(block_sync.events()),
            metrics.attach(tx_sync.events()),
            metrics.attach(evidence_sync.events()),
            metrics.attach(gossip.sync().events()),
            metrics.attach_broadcasts(tx_broadcaster.events()),
            metrics.attach_broadcasts(evidence_broadcaster.events()),
            metrics.attach_broadcasts(gossip.broadcaster().events()),
        ];

        let cache = Arc::clone(&gossip);
        subscriptions.push(block_sync.on_event(move |event| {
            if let SyncEvent::BranchAppended { tip, .. } = event {
                let pruned = cache.prune_below(tip.height);
                if pruned > 0 {
                    debug!(pruned, height = tip.height, "Dropped consensus payloads below the tip");
                }
            }
        }));

        Arc::new(Self {
            chain,
            transactions,
            evidence,
            explorer,
            config,
            block_sync,
            tx_sync,
            evidence_sync,
            tx_broadcaster,
            evidence_broadcaster,
            gossip,
            metrics,
            _subscriptions: subscriptions,
        })
    }

    /// Inbound handler to register with the transport
    pub fn handler(self: &Arc<Self>) -> Arc<SyncHandler> {
        Arc::new(SyncHandler::new(Arc::clone(self)))
    }

    /// Periodic sync and broadcast loops, not yet started
    pub fn services(&self) -> BackgroundServices {
        let config = &self.config;
        let mut services = BackgroundServices::new();
        services.push(Arc::new(BlockSyncTask::new(
            Arc::clone(&self.block_sync),
            config.block_sync_interval,
        )));
        services.push(Arc::new(ContentSyncTask::new(
            Arc::clone(&self.tx_sync),
            config.tx_sync_interval,
        )));
        services.push(Arc::new(ContentSyncTask::new(
            Arc::clone(&self.evidence_sync),
            config.evidence_sync_interval,
        )));
        services.push(Arc::new(ContentSyncTask::new(
            Arc::clone(self.gossip.sync()),
            config.gossip_sync_interval,
        )));
        services.push(Arc::new(BroadcastTask::new(
            "tx-broadcast",
            Arc::clone(&self.tx_broadcaster),
            config.broadcast_interval,
        )));
        services.push(Arc::new(BroadcastTask::new(
            "evidence-broadcast",
            Arc::clone(&self.evidence_broadcaster),
            config.broadcast_interval,
        )));
        services.push(Arc::new(BroadcastTask::new(
            "gossip-broadcast",
            Arc::clone(self.gossip.broadcaster()),
            config.gossip_sync_interval,
        )));
        services
    }

    /// Local chain
    pub fn chain(&self) -> &Arc<dyn Blockchain> {
        &self.chain
    }

    /// Staged transactions
    pub fn transactions(&self) -> &Arc<dyn ContentPool<Transaction>> {
        &self.transactions
    }

    /// Pending evidence
    pub fn evidence(&self) -> &Arc<dyn ContentPool<Evidence>> {
        &self.evidence
    }

    /// Peer discovery and broadcast
    pub fn explorer(&self) -> &Arc<PeerExplorer> {
        &self.explorer
    }

    /// Settings
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Block catch-up
    pub fn block_sync(&self) -> &Arc<BlockSync> {
        &self.block_sync
    }

    /// Transaction pull
    pub fn tx_sync(&self) -> &Arc<ContentSync<TxFetcher>> {
        &self.tx_sync
    }

    /// Evidence pull
    pub fn evidence_sync(&self) -> &Arc<ContentSync<EvidenceFetcher>> {
        &self.evidence_sync
    }

    /// Transaction advertisements
    pub fn tx_broadcaster(&self) -> &Arc<Broadcaster> {
        &self.tx_broadcaster
    }

    /// Evidence advertisements
    pub fn evidence_broadcaster(&self) -> &Arc<Broadcaster> {
        &self.evidence_broadcaster
    }

    /// Consensus gossip
    pub fn gossip(&self) -> &Arc<ConsensusGossip> {
        &self.gossip
    }

    /// Counters
    pub fn metrics(&self) -> &Arc<SyncMetrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{chain_of, ScriptedTransport};
    use fugue_crypto::random_private_key;
    use fugue_network::{ExplorerConfig, RoutingTable, Transport};
    use fugue_types::MemoryPool;

    fn synchronizer() -> Arc<Synchronizer> {
        let (chain, _) = chain_of(0);
        let transport = ScriptedTransport::new(vec![]);
        let table = Arc::new(RoutingTable::with_defaults(transport.local_peer().address));
        let explorer = Arc::new(PeerExplorer::new(table, transport, ExplorerConfig::default()));
        let transactions: Arc<MemoryPool<Transaction>> = Arc::new(MemoryPool::new());
        let evidence: Arc<MemoryPool<Evidence>> = Arc::new(MemoryPool::new());
        Synchronizer::new(chain, transactions, evidence, explorer, SyncConfig::default())
    }

    #[test]
    fn test_one_service_per_loop() {
        let sync = synchronizer();
        let names: Vec<&str> = sync.services().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "block-sync",
                "tx",
                "evidence",
                "gossip",
                "tx-broadcast",
                "evidence-broadcast",
                "gossip-broadcast"
            ]
        );
    }

    #[test]
    fn test_staged_transaction_queued_for_broadcast() {
        let sync = synchronizer();
        let tx = Transaction::signed(&random_private_key(), 0, 1, vec![1]).unwrap();
        assert!(sync.transactions().try_add(tx));
        assert_eq!(sync.tx_broadcaster().pending_len(), 1);
        assert_eq!(sync.evidence_broadcaster().pending_len(), 0);
    }

    #[tokio::test]
    async fn test_broadcasts_counted() {
        let sync = synchronizer();
        let tx = Transaction::signed(&random_private_key(), 0, 1, vec![1]).unwrap();
        sync.transactions().try_add(tx);
        sync.tx_broadcaster().flush();
        assert_eq!(sync.metrics().snapshot().broadcasts, 1);
    }
}
