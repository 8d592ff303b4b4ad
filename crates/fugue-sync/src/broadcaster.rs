//! Push side of gossip: periodic id advertisements

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use fugue_network::{BroadcastOptions, Message, Peer, PeerExplorer, PeriodicTask};
use fugue_primitives::{Address, H256};
use fugue_types::{ContentPool, Observers, PoolEvent, PoolItem, Subscription};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::BroadcastEvent;

/// Builds the advertisement for a batch of ids
pub type Advertise = fn(Vec<H256>) -> Message;

/// Collects ids of newly staged content and advertises them in batches.
pub struct Broadcaster {
    explorer: Arc<PeerExplorer>,
    advertise: Advertise,
    pending: Mutex<BTreeSet<H256>>,
    events: Observers<BroadcastEvent>,
}

impl Broadcaster {
    /// Broadcaster sending `advertise(ids)` through `explorer`
    pub fn new(explorer: Arc<PeerExplorer>, advertise: Advertise) -> Arc<Self> {
        Arc::new(Self {
            explorer,
            advertise,
            pending: Mutex::new(BTreeSet::new()),
            events: Observers::new(),
        })
    }

    /// Broadcaster for transaction ids
    pub fn transactions(explorer: Arc<PeerExplorer>) -> Arc<Self> {
        Self::new(explorer, |ids| Message::TxIds { ids })
    }

    /// Broadcaster for evidence ids
    pub fn evidence(explorer: Arc<PeerExplorer>) -> Arc<Self> {
        Self::new(explorer, |ids| Message::EvidenceIds { ids })
    }

    /// Broadcaster for consensus payload ids
    pub fn gossip(explorer: Arc<PeerExplorer>) -> Arc<Self> {
        Self::new(explorer, |ids| Message::Have { ids })
    }

    /// Follow a pool: added items are queued, removed ones withdrawn.
    pub fn attach<T: PoolItem>(self: &Arc<Self>, pool: &dyn ContentPool<T>) -> Subscription {
        let weak: Weak<Self> = Arc::downgrade(self);
        pool.subscribe(Arc::new(move |event: &PoolEvent| {
            let Some(this) = weak.upgrade() else { return };
            match event {
                PoolEvent::Added(id) => this.enqueue(*id),
                PoolEvent::Removed(id) => this.withdraw(id),
            }
        }))
    }

    /// Queue an id for the next advertisement
    pub fn enqueue(&self, id: H256) {
        self.pending.lock().insert(id);
    }

    /// Drop a queued id
    pub fn withdraw(&self, id: &H256) {
        self.pending.lock().remove(id);
    }

    /// Number of queued ids
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Advertise every queued id at once. Returns the targeted peers.
    pub fn flush(&self) -> Vec<Peer> {
        let ids: Vec<H256> = std::mem::take(&mut *self.pending.lock()).into_iter().collect();
        if ids.is_empty() {
            return Vec::new();
        }
        self.send(ids, BroadcastOptions::default())
    }

    /// Advertise `ids` to everyone but `source`, removing them from the queue.
    pub fn rebroadcast(&self, ids: Vec<H256>, source: Address) -> Vec<Peer> {
        if ids.is_empty() {
            return Vec::new();
        }
        {
            let mut pending = self.pending.lock();
            for id in &ids {
                pending.remove(id);
            }
        }
        self.send(ids, BroadcastOptions::except(source))
    }

    fn send(&self, ids: Vec<H256>, options: BroadcastOptions) -> Vec<Peer> {
        let message = (self.advertise)(ids.clone());
        let kind = message.kind();
        let peers = self.explorer.broadcast(message, options);
        debug!(kind, ids = ids.len(), peers = peers.len(), "Advertised ids");
        self.events.emit(&BroadcastEvent {
            kind,
            peers: peers.clone(),
            ids,
        });
        peers
    }

    /// Advertisement stream
    pub fn events(&self) -> &Observers<BroadcastEvent> {
        &self.events
    }

    /// Register an advertisement observer
    pub fn on_broadcast<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&BroadcastEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }
}

/// Flushes a [`Broadcaster`] on a fixed interval.
pub struct BroadcastTask {
    name: &'static str,
    broadcaster: Arc<Broadcaster>,
    interval: Duration,
}

impl BroadcastTask {
    /// Flush `broadcaster` every `interval`
    pub fn new(name: &'static str, broadcaster: Arc<Broadcaster>, interval: Duration) -> Self {
        Self {
            name,
            broadcaster,
            interval,
        }
    }
}

#[async_trait]
impl PeriodicTask for BroadcastTask {
    fn name(&self) -> &'static str {
        self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self, _cancel: &CancellationToken) {
        self.broadcaster.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedTransport;
    use fugue_crypto::random_private_key;
    use fugue_network::{ExplorerConfig, RoutingTable, Transport};
    use fugue_types::{MemoryPool, Transaction};

    fn explorer_with_peers(n: u8) -> Arc<PeerExplorer> {
        let transport = ScriptedTransport::new(vec![]);
        let table = Arc::new(RoutingTable::with_defaults(transport.local_peer().address));
        for i in 0..n {
            let peer = Peer::new(Address::from_bytes([0x10 + i; 20]), "127.0.0.1:3000".parse().unwrap());
            table.add(peer).unwrap();
        }
        Arc::new(PeerExplorer::new(table, transport, ExplorerConfig::default()))
    }

    fn recorder(broadcaster: &Broadcaster) -> (Arc<Mutex<Vec<BroadcastEvent>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = broadcaster.on_broadcast(move |e| sink.lock().push(e.clone()));
        (seen, sub)
    }

    #[tokio::test]
    async fn test_flush_sends_one_advertisement() {
        let broadcaster = Broadcaster::transactions(explorer_with_peers(3));
        let (seen, _sub) = recorder(&broadcaster);

        broadcaster.enqueue(H256::from_bytes([1; 32]));
        broadcaster.enqueue(H256::from_bytes([2; 32]));
        let peers = broadcaster.flush();

        assert_eq!(peers.len(), 3);
        assert_eq!(broadcaster.pending_len(), 0);
        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "tx_ids");
        assert_eq!(events[0].ids.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_flush_is_silent() {
        let broadcaster = Broadcaster::evidence(explorer_with_peers(2));
        let (seen, _sub) = recorder(&broadcaster);
        assert!(broadcaster.flush().is_empty());
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rebroadcast_skips_source() {
        let explorer = explorer_with_peers(3);
        let source = explorer.peers()[0].address;
        let broadcaster = Broadcaster::gossip(explorer);
        let id = H256::from_bytes([9; 32]);
        broadcaster.enqueue(id);

        let peers = broadcaster.rebroadcast(vec![id], source);
        assert_eq!(peers.len(), 2);
        assert!(peers.iter().all(|p| p.address != source));
        assert_eq!(broadcaster.pending_len(), 0);
    }

    #[test]
    fn test_attached_pool_feeds_queue() {
        let broadcaster = Broadcaster::transactions(explorer_with_peers(0));
        let pool: MemoryPool<Transaction> = MemoryPool::new();
        let _sub = broadcaster.attach::<Transaction>(&pool);

        let tx = Transaction::signed(&random_private_key(), 0, 0, vec![1]).unwrap();
        pool.try_add(tx.clone());
        assert_eq!(broadcaster.pending_len(), 1);
        pool.remove(&tx.id());
        assert_eq!(broadcaster.pending_len(), 0);
    }
}
