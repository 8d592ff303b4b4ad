//! Kademlia-style peer discovery and liveness maintenance

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fugue_primitives::Address;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::envelope::MessageEnvelope;
use crate::error::{NetworkError, NetworkResult};
use crate::message::Message;
use crate::peer::{Peer, PeerState};
use crate::routing::RoutingTable;
use crate::service::PeriodicTask;
use crate::transport::{MessageHandler, Transport};

/// Neighbors expanded per lookup step
pub const FIND_CONCURRENCY: usize = 3;

/// Default lookup depth
pub const MAX_DEPTH: usize = 3;

/// Explorer settings
#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    /// New neighbors kept per lookup step
    pub find_concurrency: usize,
    /// Default lookup depth
    pub max_depth: usize,
    /// Ping timeout
    pub ping_timeout: Duration,
    /// Timeout for neighbor requests
    pub request_timeout: Duration,
    /// Minimum broadcast fan-out
    pub minimum_broadcast_target: usize,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            find_concurrency: FIND_CONCURRENCY,
            max_depth: MAX_DEPTH,
            ping_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
            minimum_broadcast_target: 10,
        }
    }
}

/// Broadcast fan-out options
#[derive(Debug, Clone, Default)]
pub struct BroadcastOptions {
    /// Peers never targeted
    pub except: HashSet<Address>,
    /// Send after this delay instead of immediately
    pub delay: Option<Duration>,
    /// Overrides the configured minimum fan-out
    pub minimum_target: Option<usize>,
}

impl BroadcastOptions {
    /// Options excluding one address
    pub fn except(address: Address) -> Self {
        Self {
            except: [address].into_iter().collect(),
            ..Self::default()
        }
    }
}

/// Maintains the routing table through lookups and pings.
pub struct PeerExplorer {
    table: Arc<RoutingTable>,
    transport: Arc<dyn Transport>,
    config: ExplorerConfig,
}

impl PeerExplorer {
    /// Create an explorer
    pub fn new(table: Arc<RoutingTable>, transport: Arc<dyn Transport>, config: ExplorerConfig) -> Self {
        Self {
            table,
            transport,
            config,
        }
    }

    /// Routing table
    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    /// Transport
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Settings
    pub fn config(&self) -> &ExplorerConfig {
        &self.config
    }

    /// Known peers
    pub fn peers(&self) -> Vec<Peer> {
        self.table.peers()
    }

    /// Record a peer observed on an inbound message. Returns true if it is
    /// now in the table; a full bucket parks it in the replacement cache.
    pub fn add_peer(&self, peer: Peer) -> bool {
        let state = PeerState::new(peer);
        match self.table.add_or_update(state) {
            Ok(true) => true,
            Ok(false) => {
                self.park(state);
                false
            }
            Err(e) => {
                trace!(%peer, error = %e, "Peer not recorded");
                false
            }
        }
    }

    /// Keep a peer whose bucket is full as a replacement candidate.
    fn park(&self, state: PeerState) {
        match self.table.add_to_replacement_cache(state) {
            Ok(()) => trace!(peer = %state.peer, "Bucket full, parked as replacement"),
            Err(e) => trace!(peer = %state.peer, error = %e, "Replacement candidate refused"),
        }
    }

    /// Bootstrap: breadth-first self-lookup from `seeds`.
    ///
    /// Seeds themselves are only added when the lookup found nobody else.
    pub async fn explore(
        &self,
        seeds: &[Peer],
        max_depth: usize,
        cancel: &CancellationToken,
    ) -> NetworkResult<()> {
        let owner = self.table.owner();
        if seeds.is_empty() {
            return Err(NetworkError::InvalidArgument("seed list is empty".into()));
        }
        if seeds.iter().any(|p| p.address == owner) {
            return Err(NetworkError::InvalidArgument("seed list contains the local node".into()));
        }

        let mut visited: HashSet<Address> = seeds.iter().map(|p| p.address).collect();
        visited.insert(owner);
        let mut queue: VecDeque<(Peer, usize)> = seeds.iter().map(|p| (*p, 0)).collect();
        let mut live_seeds = Vec::new();

        while let Some((peer, depth)) = queue.pop_front() {
            let found = tokio::select! {
                _ = cancel.cancelled() => return Err(NetworkError::Cancelled),
                found = self.transport.find_neighbors(&peer, owner, self.config.request_timeout) => found,
            };
            let found = match found {
                Ok(found) => found,
                Err(e) => {
                    debug!(%peer, depth, error = %e, "Neighbor request failed");
                    if depth > 0 {
                        self.remove_dead(&peer).await;
                    }
                    continue;
                }
            };
            if depth == 0 {
                live_seeds.push(peer);
            }

            let fresh: Vec<Peer> = found
                .into_iter()
                .filter(|p| p.address != owner && visited.insert(p.address))
                .take(self.config.find_concurrency)
                .collect();
            trace!(%peer, depth, fresh = fresh.len(), "Expanding lookup");

            let alive = join_all(fresh.iter().map(|p| self.ping(p))).await;
            for (neighbor, ok) in fresh.into_iter().zip(alive) {
                if ok && depth < max_depth {
                    queue.push_back((neighbor, depth + 1));
                }
            }
        }

        if live_seeds.is_empty() {
            return Err(NetworkError::Discovery("no seed answered".into()));
        }
        if self.table.is_empty() {
            for seed in &live_seeds {
                self.add_peer(*seed);
            }
        }
        info!(peers = self.table.len(), "Bootstrap finished");
        Ok(())
    }

    /// Locate `target`, first locally, then by lookup through the nearest
    /// known peers.
    pub async fn find_peer(
        &self,
        target: Address,
        max_depth: usize,
        cancel: &CancellationToken,
    ) -> NetworkResult<Peer> {
        let owner = self.table.owner();
        if target == owner {
            return Err(NetworkError::InvalidArgument("cannot look up the local node".into()));
        }
        if let Some(state) = self.table.get(&target) {
            if self.ping(&state.peer).await {
                return Ok(state.peer);
            }
        }

        let start = self.table.neighbors(&target, self.config.find_concurrency, false);
        let mut visited: HashSet<Address> = start.iter().map(|p| p.address).collect();
        visited.insert(owner);
        let mut queue: VecDeque<(Peer, usize)> = start.into_iter().map(|p| (p, 0)).collect();

        while let Some((peer, depth)) = queue.pop_front() {
            let found = tokio::select! {
                _ = cancel.cancelled() => return Err(NetworkError::Cancelled),
                found = self.transport.find_neighbors(&peer, target, self.config.request_timeout) => found,
            };
            let found = match found {
                Ok(found) => found,
                Err(e) => {
                    debug!(%peer, error = %e, "Neighbor request failed");
                    self.remove_dead(&peer).await;
                    continue;
                }
            };
            if let Some(hit) = found.iter().find(|p| p.address == target).copied() {
                if self.ping(&hit).await {
                    return Ok(hit);
                }
            }
            if depth >= max_depth {
                continue;
            }
            let fresh = found
                .into_iter()
                .filter(|p| p.address != owner && visited.insert(p.address))
                .take(self.config.find_concurrency);
            queue.extend(fresh.map(|p| (p, depth + 1)));
        }
        Err(NetworkError::PeerNotFound(target))
    }

    /// Ping every peer not updated within `stale_threshold`.
    pub async fn refresh(&self, stale_threshold: Duration, cancel: &CancellationToken) -> NetworkResult<()> {
        let stale = self.table.stale_peers(stale_threshold);
        if stale.is_empty() {
            return Ok(());
        }
        debug!(count = stale.len(), "Refreshing stale peers");
        tokio::select! {
            _ = cancel.cancelled() => Err(NetworkError::Cancelled),
            _ = join_all(stale.iter().map(|p| self.ping(p))) => Ok(()),
        }
    }

    /// Ping every known peer.
    pub async fn check_all_peers(&self, cancel: &CancellationToken) -> NetworkResult<()> {
        let peers = self.table.peers();
        tokio::select! {
            _ = cancel.cancelled() => Err(NetworkError::Cancelled),
            _ = join_all(peers.iter().map(|p| self.ping(p))) => Ok(()),
        }
    }

    /// Probe replacement candidates oldest first. Each leaves the cache;
    /// live ones go through the normal add path.
    pub async fn check_replacement_cache(&self, cancel: &CancellationToken) -> NetworkResult<()> {
        for peer in self.table.replacement_candidates() {
            if cancel.is_cancelled() {
                return Err(NetworkError::Cancelled);
            }
            self.table.take_replacement(&peer.address);
            self.ping(&peer).await;
        }
        Ok(())
    }

    /// Liveness probe. Success refreshes the peer; failure removes it and
    /// promotes a replacement candidate.
    pub async fn ping(&self, peer: &Peer) -> bool {
        match self.transport.ping(peer, self.config.ping_timeout).await {
            Ok(latency) => {
                let state = PeerState::checked(*peer, latency);
                match self.table.add_or_update(state) {
                    Ok(true) => {}
                    Ok(false) => self.park(state),
                    Err(e) => debug!(%peer, error = %e, "Ignoring ping result"),
                }
                true
            }
            Err(e) => {
                debug!(%peer, error = %e, "Ping failed");
                self.remove_dead(peer).await;
                false
            }
        }
    }

    async fn remove_dead(&self, peer: &Peer) {
        if self.table.remove(peer) {
            debug!(%peer, "Removed unresponsive peer");
            self.promote_replacement(self.table.bucket_index(&peer.address)).await;
        } else {
            self.table.take_replacement(&peer.address);
        }
    }

    /// Move the oldest live candidate of bucket `index` into the table.
    async fn promote_replacement(&self, index: usize) {
        while let Some(candidate) = self.table.pop_oldest_replacement(index) {
            match self.transport.ping(&candidate.peer, self.config.ping_timeout).await {
                Ok(latency) => {
                    if let Ok(true) = self.table.add_or_update(PeerState::checked(candidate.peer, latency)) {
                        debug!(peer = %candidate.peer, bucket = index, "Promoted replacement");
                    }
                    return;
                }
                Err(e) => trace!(peer = %candidate.peer, error = %e, "Replacement candidate dead"),
            }
        }
    }

    /// Answer the discovery part of the protocol. Every sender is recorded;
    /// returns `None` for messages that are not discovery requests.
    pub fn respond(&self, envelope: &MessageEnvelope) -> Option<Message> {
        self.add_peer(envelope.sender);
        match &envelope.message {
            Message::Ping => Some(Message::Pong),
            Message::FindNeighbors { target } => Some(Message::Neighbors {
                found: self.table.neighbors(target, self.table.bucket_size(), true),
            }),
            _ => None,
        }
    }

    /// Fire-and-forget broadcast to a sampled fan-out. Returns the targets.
    pub fn broadcast(&self, message: Message, options: BroadcastOptions) -> Vec<Peer> {
        let minimum = options
            .minimum_target
            .unwrap_or(self.config.minimum_broadcast_target);
        let peers = self.table.peers_to_broadcast(&options.except, minimum);
        if peers.is_empty() {
            return peers;
        }
        trace!(kind = message.kind(), targets = peers.len(), "Broadcasting");

        match options.delay {
            Some(delay) => {
                let transport = Arc::clone(&self.transport);
                let targets = peers.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    transport.post(&targets, message);
                });
            }
            None => self.transport.post(&peers, message),
        }
        peers
    }
}

#[async_trait]
impl MessageHandler for PeerExplorer {
    async fn handle(&self, envelope: MessageEnvelope) -> NetworkResult<Vec<Message>> {
        Ok(self.respond(&envelope).into_iter().collect())
    }
}

/// Periodically pings stale peers.
pub struct RefreshTableTask {
    explorer: Arc<PeerExplorer>,
    interval: Duration,
    stale_threshold: Duration,
}

impl RefreshTableTask {
    /// Refresh every `interval` peers older than `stale_threshold`
    pub fn new(explorer: Arc<PeerExplorer>, interval: Duration, stale_threshold: Duration) -> Self {
        Self {
            explorer,
            interval,
            stale_threshold,
        }
    }
}

#[async_trait]
impl PeriodicTask for RefreshTableTask {
    fn name(&self) -> &'static str {
        "refresh-table"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self, cancel: &CancellationToken) {
        if let Err(e) = self.explorer.refresh(self.stale_threshold, cancel).await {
            debug!(error = %e, "Table refresh interrupted");
        }
    }
}

/// Periodically probes the replacement cache.
pub struct ReplacementCacheTask {
    explorer: Arc<PeerExplorer>,
    interval: Duration,
}

impl ReplacementCacheTask {
    /// Probe every `interval`
    pub fn new(explorer: Arc<PeerExplorer>, interval: Duration) -> Self {
        Self { explorer, interval }
    }
}

#[async_trait]
impl PeriodicTask for ReplacementCacheTask {
    fn name(&self) -> &'static str {
        "replacement-cache"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self, cancel: &CancellationToken) {
        if let Err(e) = self.explorer.check_replacement_cache(cancel).await {
            debug!(error = %e, "Replacement cache check interrupted");
        }
    }
}
