//! Pull side of gossip for id-addressed content

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fugue_network::{Peer, PeriodicTask};
use fugue_primitives::H256;
use fugue_types::{Observers, Subscription};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broadcaster::Broadcaster;
use crate::demand::{DemandCollection, IdDemand};
use crate::error::SyncResult;
use crate::event::SyncEvent;
use crate::fetcher::{ContentFetcher, FetchController, Fetcher};

/// Turns advertised ids into fetches, one per peer and cycle.
pub struct ContentSync<F: ContentFetcher> {
    fetcher: Arc<Fetcher<F>>,
    demands: DemandCollection<IdDemand>,
    controller: FetchController,
    broadcaster: Option<Arc<Broadcaster>>,
    events: Observers<SyncEvent>,
}

impl<F: ContentFetcher> ContentSync<F> {
    /// Service whose demands expire after `lifespan`. Fetched ids are
    /// re-advertised through `broadcaster` when one is given.
    pub fn new(
        fetcher: Fetcher<F>,
        lifespan: Duration,
        broadcaster: Option<Arc<Broadcaster>>,
    ) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            demands: DemandCollection::new(lifespan),
            controller: FetchController::new(),
            broadcaster,
            events: Observers::new(),
        }
    }

    /// Content kind
    pub fn kind(&self) -> &'static str {
        self.fetcher.kind()
    }

    /// Pending demands
    pub fn demands(&self) -> &DemandCollection<IdDemand> {
        &self.demands
    }

    /// Per-peer fetch guard
    pub fn controller(&self) -> &FetchController {
        &self.controller
    }

    /// Event stream
    pub fn events(&self) -> &Observers<SyncEvent> {
        &self.events
    }

    /// Register an event observer
    pub fn on_event<E>(&self, handler: E) -> Subscription
    where
        E: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    /// Record that `peer` advertised `ids`. Ids already known are ignored.
    pub fn demand(&self, peer: Peer, ids: Vec<H256>) -> bool {
        let content = self.fetcher.content();
        let needed: Vec<H256> = ids.into_iter().filter(|id| content.is_needed(id)).collect();
        self.demands
            .add_or_update(IdDemand::new(peer, needed), |d| !d.ids.is_empty())
    }

    /// Narrow demands to ids still unknown locally, dropping those left
    /// empty. Returns the number of demands left.
    pub fn prune_demands(&self) -> usize {
        let content = self.fetcher.content();
        self.demands.prune(|d| {
            d.ids.retain(|id| content.is_needed(id));
            !d.ids.is_empty()
        });
        self.demands.len()
    }

    /// One cycle: flush demands, fetch from every distinct peer at once,
    /// then re-advertise what arrived. Returns the number of accepted items.
    pub async fn sync_once(&self, cancel: &CancellationToken) -> SyncResult<usize> {
        self.prune_demands();
        let demands = self.demands.flush();
        if demands.is_empty() {
            return Ok(0);
        }

        let mut tasks = JoinSet::new();
        for demand in demands {
            let Some(guard) = self.controller.try_acquire(&demand.peer) else {
                debug!(kind = self.kind(), peer = %demand.peer, "Fetch in flight, dropping demand");
                continue;
            };
            let fetcher = Arc::clone(&self.fetcher);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _guard = guard;
                let peer = demand.peer;
                let ids: Vec<H256> = demand.ids.into_iter().collect();
                let result = fetcher.fetch(&peer, ids, &cancel).await;
                let fetched: SyncResult<Vec<H256>> = result
                    .map(|items| items.iter().map(|item| fetcher.content().id_of(item)).collect());
                (peer, fetched)
            });
        }

        let mut total = 0;
        while let Some(joined) = tasks.join_next().await {
            let (peer, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(kind = self.kind(), error = %e, "Fetch task aborted");
                    continue;
                }
            };
            match result {
                Ok(ids) => {
                    total += ids.len();
                    self.events.emit(&SyncEvent::Fetched {
                        kind: self.kind(),
                        peer,
                        count: ids.len(),
                    });
                    if let Some(broadcaster) = &self.broadcaster {
                        broadcaster.rebroadcast(ids, peer.address);
                    }
                }
                Err(e) => {
                    warn!(kind = self.kind(), %peer, error = %e, "Fetch failed");
                    self.events.emit(&SyncEvent::FetchFailed {
                        kind: self.kind(),
                        peer,
                        error: e.to_string(),
                    });
                }
            }
        }
        if total > 0 {
            // demands that arrived while fetching
            self.prune_demands();
        }
        Ok(total)
    }
}

/// Runs [`ContentSync::sync_once`] on a fixed interval.
pub struct ContentSyncTask<F: ContentFetcher> {
    sync: Arc<ContentSync<F>>,
    interval: Duration,
}

impl<F: ContentFetcher> ContentSyncTask<F> {
    /// Sync every `interval`
    pub fn new(sync: Arc<ContentSync<F>>, interval: Duration) -> Self {
        Self { sync, interval }
    }
}

#[async_trait]
impl<F: ContentFetcher> PeriodicTask for ContentSyncTask<F> {
    fn name(&self) -> &'static str {
        self.sync.kind()
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self, cancel: &CancellationToken) {
        if let Err(e) = self.sync.sync_once(cancel).await {
            debug!(kind = self.sync.kind(), error = %e, "Sync cycle interrupted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::TxFetcher;
    use crate::testing::{chain_of, ScriptedTransport};
    use fugue_crypto::random_private_key;
    use fugue_network::Message;
    use fugue_types::{ContentPool, MemoryPool, Transaction};
    use parking_lot::Mutex;

    fn tx(nonce: u64) -> Transaction {
        Transaction::signed(&random_private_key(), nonce, 1, vec![nonce as u8]).unwrap()
    }

    fn tx_sync(
        transport: Arc<ScriptedTransport>,
        pool: Arc<MemoryPool<Transaction>>,
    ) -> ContentSync<TxFetcher> {
        let (chain, _) = chain_of(0);
        let fetcher = Fetcher::new(TxFetcher::new(chain, pool), transport, Duration::from_secs(1));
        ContentSync::new(fetcher, Duration::from_secs(30), None)
    }

    #[tokio::test]
    async fn test_sync_once_stages_demanded_items() {
        let item = tx(1);
        let transport = ScriptedTransport::new(vec![Message::TransactionResponse {
            transactions: vec![item.clone()],
            is_last: true,
        }]);
        let pool: Arc<MemoryPool<Transaction>> = Arc::new(MemoryPool::new());
        let sync = tx_sync(transport.clone(), pool.clone());

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = sync.on_event(move |e| sink.lock().push(e.clone()));

        assert!(sync.demand(transport.remote(), vec![item.id()]));
        assert_eq!(sync.sync_once(&CancellationToken::new()).await.unwrap(), 1);
        assert!(pool.contains(&item.id()));
        assert!(matches!(
            events.lock().as_slice(),
            [SyncEvent::Fetched { kind: "tx", count: 1, .. }]
        ));
        assert!(sync.demands().is_empty());
    }

    #[tokio::test]
    async fn test_known_ids_create_no_demand() {
        let item = tx(1);
        let pool: Arc<MemoryPool<Transaction>> = Arc::new(MemoryPool::new());
        pool.try_add(item.clone());
        let transport = ScriptedTransport::new(vec![]);
        let sync = tx_sync(transport.clone(), pool);

        assert!(!sync.demand(transport.remote(), vec![item.id()]));
        assert_eq!(sync.sync_once(&CancellationToken::new()).await.unwrap(), 0);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_one_fetch_per_peer() {
        let (a, b) = (tx(1), tx(2));
        let transport = ScriptedTransport::new(vec![Message::TransactionResponse {
            transactions: vec![a.clone(), b.clone()],
            is_last: true,
        }]);
        let sync = tx_sync(transport.clone(), Arc::new(MemoryPool::new()));

        sync.demand(transport.remote(), vec![a.id()]);
        sync.demand(transport.remote(), vec![b.id()]);
        sync.sync_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_busy_peer_demand_dropped() {
        let item = tx(1);
        let transport = ScriptedTransport::new(vec![]);
        let sync = tx_sync(transport.clone(), Arc::new(MemoryPool::new()));

        let _busy = sync.controller().try_acquire(&transport.remote()).unwrap();
        sync.demand(transport.remote(), vec![item.id()]);
        assert_eq!(sync.sync_once(&CancellationToken::new()).await.unwrap(), 0);
        assert!(transport.requests().is_empty());
        assert!(sync.demands().is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_reported() {
        let item = tx(1);
        let transport = ScriptedTransport::new(vec![Message::Pong]);
        let sync = tx_sync(transport.clone(), Arc::new(MemoryPool::new()));
        let failures = Arc::new(Mutex::new(0));
        let sink = failures.clone();
        let _sub = sync.on_event(move |e| {
            if matches!(e, SyncEvent::FetchFailed { .. }) {
                *sink.lock() += 1;
            }
        });

        sync.demand(transport.remote(), vec![item.id()]);
        assert_eq!(sync.sync_once(&CancellationToken::new()).await.unwrap(), 0);
        assert_eq!(*failures.lock(), 1);
        assert!(!sync.controller().is_busy(&transport.remote().address));
    }

    #[tokio::test]
    async fn test_demand_satisfied_elsewhere_is_pruned() {
        let (a, b) = (tx(1), tx(2));
        let pool: Arc<MemoryPool<Transaction>> = Arc::new(MemoryPool::new());
        let transport = ScriptedTransport::new(vec![]);
        let sync = tx_sync(transport.clone(), pool.clone());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let _sub = sync.on_event(move |e| sink.lock().push(e.clone()));

        assert!(sync.demand(transport.remote(), vec![a.id(), b.id()]));
        pool.try_add(a.clone());
        assert_eq!(sync.prune_demands(), 1);
        let narrowed = sync.demands().get(&transport.remote().address).unwrap();
        assert_eq!(narrowed.ids.iter().copied().collect::<Vec<_>>(), vec![b.id()]);

        pool.try_add(b.clone());
        assert_eq!(sync.sync_once(&CancellationToken::new()).await.unwrap(), 0);
        assert!(sync.demands().is_empty());
        assert!(transport.requests().is_empty());
        assert!(events.lock().is_empty());
    }
}
