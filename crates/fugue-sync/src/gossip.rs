//! Consensus message gossip.
//!
//! Payloads are cached by id, advertised with `Have`, pulled with `Want` and
//! handed to the consensus engine through [`ConsensusGossip::on_message`].

use std::sync::Arc;

use fugue_network::{ConsensusPayload, Peer, PeerExplorer};
use fugue_primitives::H256;
use fugue_types::{ContentPool, MemoryPool, Observers, Subscription};
use tracing::debug;

use crate::broadcaster::Broadcaster;
use crate::config::SyncConfig;
use crate::content_sync::ContentSync;
use crate::fetcher::{Fetcher, GossipFetcher};

/// Push/pull gossip of opaque consensus payloads.
pub struct ConsensusGossip {
    cache: Arc<MemoryPool<ConsensusPayload>>,
    sync: Arc<ContentSync<GossipFetcher>>,
    broadcaster: Arc<Broadcaster>,
    received: Observers<ConsensusPayload>,
    _feed: Subscription,
}

impl ConsensusGossip {
    /// Gossip over `explorer`'s peers
    pub fn new(explorer: Arc<PeerExplorer>, config: &SyncConfig) -> Arc<Self> {
        let cache: Arc<MemoryPool<ConsensusPayload>> = Arc::new(MemoryPool::new());
        let received = Observers::new();
        let broadcaster = Broadcaster::gossip(Arc::clone(&explorer));
        let feed = broadcaster.attach::<ConsensusPayload>(cache.as_ref());

        let fetcher = Fetcher::new(
            GossipFetcher::new(cache.clone(), received.clone()),
            Arc::clone(explorer.transport()),
            config.fetch_timeout,
        );
        let sync = Arc::new(ContentSync::new(
            fetcher,
            config.content_demand_lifespan,
            Some(Arc::clone(&broadcaster)),
        ));

        Arc::new(Self {
            cache,
            sync,
            broadcaster,
            received,
            _feed: feed,
        })
    }

    /// Stage a locally produced payload for advertisement.
    /// False if it is already known.
    pub fn publish(&self, payload: ConsensusPayload) -> bool {
        self.cache.try_add(payload)
    }

    /// Accept a payload pushed by `peer`. New payloads reach the observers.
    pub fn receive(&self, peer: &Peer, payload: ConsensusPayload) -> bool {
        if !self.cache.try_add(payload.clone()) {
            return false;
        }
        debug!(%peer, height = payload.height, round = payload.round, "Consensus payload received");
        self.received.emit(&payload);
        true
    }

    /// Record that `peer` has `ids`
    pub fn demand(&self, peer: Peer, ids: Vec<H256>) -> bool {
        self.sync.demand(peer, ids)
    }

    /// Cached payload
    pub fn get(&self, id: &H256) -> Option<ConsensusPayload> {
        self.cache.get(id)
    }

    /// Cached payloads among `ids`, in request order
    pub fn payloads(&self, ids: &[H256]) -> Vec<ConsensusPayload> {
        ids.iter().filter_map(|id| self.cache.get(id)).collect()
    }

    /// True if the payload is cached
    pub fn contains(&self, id: &H256) -> bool {
        self.cache.contains(id)
    }

    /// Drop payloads of heights below `height`. Returns how many were dropped.
    pub fn prune_below(&self, height: u64) -> usize {
        self.cache
            .ids()
            .into_iter()
            .filter(|id| matches!(self.cache.get(id), Some(p) if p.height < height))
            .filter_map(|id| self.cache.remove(&id))
            .count()
    }

    /// Register the consensus engine's receiver
    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConsensusPayload) + Send + Sync + 'static,
    {
        self.received.subscribe(handler)
    }

    /// Pull service
    pub fn sync(&self) -> &Arc<ContentSync<GossipFetcher>> {
        &self.sync
    }

    /// `Have` broadcaster
    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    /// Number of cached payloads
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// True if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
