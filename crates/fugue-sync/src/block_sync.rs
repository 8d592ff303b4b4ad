//! Block catch-up: tip demands are resolved into branches, which are then
//! appended in height order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fugue_network::{BroadcastOptions, Message, Peer, PeerExplorer, PeriodicTask};
use fugue_primitives::{Address, H256};
use fugue_types::{BlockSummary, Blockchain, Observers, Subscription};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::branch::{BlockBranch, BranchCollection};
use crate::config::SyncConfig;
use crate::demand::{BlockDemand, DemandCollection};
use crate::error::{SyncError, SyncResult};
use crate::event::SyncEvent;
use crate::fetcher::{BlockFetcher, FetchController, Fetcher};

/// Keeps the local chain up with the tips peers advertise.
pub struct BlockSync {
    chain: Arc<dyn Blockchain>,
    explorer: Arc<PeerExplorer>,
    fetcher: Fetcher<BlockFetcher>,
    demands: DemandCollection<BlockDemand>,
    controller: FetchController,
    branches: BranchCollection,
    config: SyncConfig,
    events: Observers<SyncEvent>,
}

impl BlockSync {
    /// Create the service
    pub fn new(chain: Arc<dyn Blockchain>, explorer: Arc<PeerExplorer>, config: SyncConfig) -> Arc<Self> {
        let fetcher = Fetcher::new(
            BlockFetcher::new(Arc::clone(&chain), config.chunk_size),
            Arc::clone(explorer.transport()),
            config.fetch_timeout,
        );
        Arc::new(Self {
            chain,
            explorer,
            fetcher,
            demands: DemandCollection::new(config.block_demand_lifespan),
            controller: FetchController::new(),
            branches: BranchCollection::new(),
            config,
            events: Observers::new(),
        })
    }

    /// Local chain
    pub fn chain(&self) -> &Arc<dyn Blockchain> {
        &self.chain
    }

    /// Pending tip demands
    pub fn demands(&self) -> &DemandCollection<BlockDemand> {
        &self.demands
    }

    /// Resolved branches not yet appended
    pub fn branches(&self) -> &BranchCollection {
        &self.branches
    }

    /// Per-peer resolution guard
    pub fn controller(&self) -> &FetchController {
        &self.controller
    }

    /// Event stream
    pub fn events(&self) -> &Observers<SyncEvent> {
        &self.events
    }

    /// Register an event observer
    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    /// Record a tip advertisement. Only tips above ours are kept.
    pub fn demand(&self, peer: Peer, summary: BlockSummary) -> bool {
        let local = self.chain.tip().height;
        self.demands
            .add_or_update(BlockDemand::new(peer, summary), |d| d.height() > local)
    }

    /// Record a tip advertised along with its chain's genesis hash. Tips of
    /// another chain are refused.
    pub fn demand_tip(&self, peer: Peer, genesis_hash: H256, summary: BlockSummary) -> SyncResult<bool> {
        let local = self.chain.genesis_hash();
        if genesis_hash != local {
            return Err(SyncError::GenesisMismatch {
                local,
                remote: genesis_hash,
            });
        }
        Ok(self.demand(peer, summary))
    }

    /// Drop tip demands the local chain has caught up with. Returns the
    /// number of demands left.
    pub fn prune_demands(&self) -> usize {
        let local = self.chain.tip().height;
        self.demands.prune(|d| d.height() > local);
        self.demands.len()
    }

    /// Advertise our tip to a broadcast sample, skipping `except`.
    pub fn broadcast_tip(&self, except: Option<Address>) -> Vec<Peer> {
        let message = Message::BlockSummary {
            genesis_hash: self.chain.genesis_hash(),
            summary: self.chain.tip(),
        };
        let options = match except {
            Some(address) => BroadcastOptions::except(address),
            None => BroadcastOptions::default(),
        };
        self.explorer.broadcast(message, options)
    }

    /// Resolve then append. Returns the number of blocks appended.
    pub async fn sync_once(self: &Arc<Self>, cancel: &CancellationToken) -> usize {
        self.resolve(cancel).await;
        self.append(cancel).await
    }

    /// Turn live demands above the tip into branches, with at most one
    /// resolution per peer. Returns the number of branches stored.
    pub async fn resolve(self: &Arc<Self>, cancel: &CancellationToken) -> usize {
        let tip = self.chain.tip();
        let mut tasks = JoinSet::new();
        for demand in self.demands.flush() {
            if demand.height() <= tip.height {
                continue;
            }
            let Some(guard) = self.controller.try_acquire(&demand.peer) else {
                debug!(peer = %demand.peer, "Resolution in flight, dropping demand");
                continue;
            };
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let _guard = guard;
                let result = this.resolve_branch(&demand.peer, &cancel).await;
                (demand.peer, result)
            });
        }

        let mut resolved = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer, Ok(Some(branch)))) => {
                    let branch_len = branch.len();
                    debug!(%peer, branch_len, tip = branch.tip().height, "Branch resolved");
                    if self.branches.add(tip.hash, peer, branch) {
                        resolved += 1;
                    }
                    self.events.emit(&SyncEvent::Resolved { peer, branch_len });
                }
                Ok((peer, Ok(None))) => debug!(%peer, "Peer has no blocks we lack"),
                Ok((peer, Err(e))) => {
                    warn!(%peer, error = %e, "Branch resolution failed");
                    self.events.emit(&SyncEvent::ResolveFailed {
                        peer,
                        error: e.to_string(),
                    });
                }
                Err(e) => warn!(error = %e, "Resolve task aborted"),
            }
        }
        resolved
    }

    async fn resolve_branch(
        &self,
        peer: &Peer,
        cancel: &CancellationToken,
    ) -> SyncResult<Option<BlockBranch>> {
        let locator = self.chain.locator();
        let transport = self.explorer.transport();
        let mut hashes = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            hashes = transport.get_block_hashes(peer, locator, self.config.fetch_timeout) => hashes?,
        };
        hashes.truncate(self.config.block_hash_limit);
        if hashes.is_empty() {
            return Ok(None);
        }

        let pairs = self.fetcher.fetch(peer, hashes, cancel).await?;
        let Some((first, _)) = pairs.first() else {
            return Ok(None);
        };
        let parent_hash = first.header.parent_hash;
        let parent = self.chain.block(&parent_hash).ok_or_else(|| {
            SyncError::InvalidBranch(format!("parent {} is not known locally", parent_hash.short()))
        })?;

        let (blocks, commits) = pairs.into_iter().unzip();
        BlockBranch::new(parent.summary(), blocks, commits).map(Some)
    }

    /// Append every stored branch, each on its own task. Returns the number
    /// of blocks appended.
    pub async fn append(self: &Arc<Self>, cancel: &CancellationToken) -> usize {
        let branches = self.branches.take_all();
        if branches.is_empty() {
            return 0;
        }

        let mut tasks = JoinSet::new();
        for (peer, branch) in branches {
            let this = Arc::clone(self);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let outcome = this.append_branch(branch, &cancel).await;
                (peer, outcome)
            });
        }
        let pruned = self.branches.prune(self.chain.tip().height);
        if pruned > 0 {
            debug!(pruned, "Dropped branches below the tip");
        }

        let mut total = 0;
        while let Some(joined) = tasks.join_next().await {
            let (peer, (appended, failure)) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!(error = %e, "Append task aborted");
                    continue;
                }
            };
            total += appended;
            match failure {
                None | Some(SyncError::Cancelled) => {
                    if appended == 0 {
                        continue;
                    }
                    let tip = self.chain.tip();
                    info!(%peer, appended, height = tip.height, hash = %tip.hash.short(), "Branch appended");
                    self.events.emit(&SyncEvent::BranchAppended { peer, appended, tip });
                    self.broadcast_tip(Some(peer.address));
                }
                Some(e) => {
                    warn!(%peer, appended, error = %e, "Branch append aborted");
                    self.events.emit(&SyncEvent::AppendFailed {
                        peer,
                        appended,
                        error: e.to_string(),
                    });
                }
            }
        }
        if total > 0 {
            let left = self.prune_demands();
            debug!(left, "Pruned tip demands");
        }
        total
    }

    /// Append blocks strictly in order. Stops at the first rejected block or
    /// when cancelled between blocks.
    async fn append_branch(
        &self,
        branch: BlockBranch,
        cancel: &CancellationToken,
    ) -> (usize, Option<SyncError>) {
        let mut appended = 0;
        for (block, commit) in branch.into_pairs() {
            if cancel.is_cancelled() {
                return (appended, Some(SyncError::Cancelled));
            }
            if self.chain.contains_block(&block.hash()) {
                continue;
            }
            if let Err(e) = self.chain.append(block, commit) {
                return (appended, Some(e.into()));
            }
            appended += 1;
            tokio::task::yield_now().await;
        }
        (appended, None)
    }
}

/// Runs [`BlockSync::sync_once`] on a fixed interval.
pub struct BlockSyncTask {
    sync: Arc<BlockSync>,
    interval: Duration,
}

impl BlockSyncTask {
    /// Sync every `interval`
    pub fn new(sync: Arc<BlockSync>, interval: Duration) -> Self {
        Self { sync, interval }
    }
}

#[async_trait]
impl PeriodicTask for BlockSyncTask {
    fn name(&self) -> &'static str {
        "block-sync"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self, cancel: &CancellationToken) {
        self.sync.sync_once(cancel).await;
    }
}
