//! Per-peer advertisements waiting to be fetched.
//!
//! Inbound advertisements become demands; each synchronization cycle
//! flushes the collection in one swap so every advertisement is attempted
//! at most once.

use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};

use fugue_network::Peer;
use fugue_primitives::{Address, H256};
use fugue_types::BlockSummary;
use parking_lot::Mutex;

/// Something a peer advertised that we may want to fetch.
pub trait Demand: Sized + Send + 'static {
    /// Advertising peer
    fn peer(&self) -> &Peer;

    /// Creation time
    fn created_at(&self) -> Instant;

    /// Fold a newer advertisement from the same peer into this one.
    /// Returns true if this demand changed.
    fn absorb(&mut self, newer: Self) -> bool;

    /// True once older than `lifespan`
    fn is_stale(&self, lifespan: Duration) -> bool {
        self.created_at().elapsed() > lifespan
    }
}

/// A peer's advertised tip
#[derive(Debug, Clone)]
pub struct BlockDemand {
    /// Advertising peer
    pub peer: Peer,
    /// Advertised tip
    pub summary: BlockSummary,
    /// Creation time
    pub created_at: Instant,
}

impl BlockDemand {
    /// Demand created now
    pub fn new(peer: Peer, summary: BlockSummary) -> Self {
        Self {
            peer,
            summary,
            created_at: Instant::now(),
        }
    }

    /// Advertised height
    pub fn height(&self) -> u64 {
        self.summary.height
    }
}

impl Demand for BlockDemand {
    fn peer(&self) -> &Peer {
        &self.peer
    }

    fn created_at(&self) -> Instant {
        self.created_at
    }

    fn absorb(&mut self, newer: Self) -> bool {
        if newer.summary.height > self.summary.height {
            *self = newer;
            true
        } else {
            false
        }
    }
}

/// Content ids a peer advertised (transactions, evidence, gossip)
#[derive(Debug, Clone)]
pub struct IdDemand {
    /// Advertising peer
    pub peer: Peer,
    /// Advertised ids
    pub ids: BTreeSet<H256>,
    /// Creation time
    pub created_at: Instant,
}

impl IdDemand {
    /// Demand created now
    pub fn new(peer: Peer, ids: impl IntoIterator<Item = H256>) -> Self {
        Self {
            peer,
            ids: ids.into_iter().collect(),
            created_at: Instant::now(),
        }
    }
}

impl Demand for IdDemand {
    fn peer(&self) -> &Peer {
        &self.peer
    }

    fn created_at(&self) -> Instant {
        self.created_at
    }

    fn absorb(&mut self, newer: Self) -> bool {
        let before = self.ids.len();
        self.ids.extend(newer.ids);
        self.peer = newer.peer;
        self.created_at = newer.created_at;
        self.ids.len() > before
    }
}

/// Latest demand per peer.
pub struct DemandCollection<D: Demand> {
    lifespan: Duration,
    demands: Mutex<HashMap<Address, D>>,
}

impl<D: Demand> DemandCollection<D> {
    /// Collection whose demands expire after `lifespan`
    pub fn new(lifespan: Duration) -> Self {
        Self {
            lifespan,
            demands: Mutex::new(HashMap::new()),
        }
    }

    /// Demand lifespan
    pub fn lifespan(&self) -> Duration {
        self.lifespan
    }

    /// Record `demand` if it is live and `is_needed` accepts it.
    ///
    /// An existing live demand of the same peer is only advanced, never
    /// regressed. Returns true if the collection changed.
    pub fn add_or_update<F>(&self, demand: D, is_needed: F) -> bool
    where
        F: FnOnce(&D) -> bool,
    {
        if demand.is_stale(self.lifespan) || !is_needed(&demand) {
            return false;
        }
        let address = demand.peer().address;
        let mut demands = self.demands.lock();
        match demands.get_mut(&address) {
            Some(existing) if !existing.is_stale(self.lifespan) => existing.absorb(demand),
            _ => {
                demands.insert(address, demand);
                true
            }
        }
    }

    /// Take every live demand, leaving the collection empty.
    pub fn flush(&self) -> Vec<D> {
        let taken = std::mem::take(&mut *self.demands.lock());
        taken
            .into_values()
            .filter(|d| !d.is_stale(self.lifespan))
            .collect()
    }

    /// Drop stale demands and those `keep` rejects. `keep` may narrow a
    /// demand in place.
    pub fn prune<F>(&self, mut keep: F)
    where
        F: FnMut(&mut D) -> bool,
    {
        let lifespan = self.lifespan;
        self.demands
            .lock()
            .retain(|_, d| !d.is_stale(lifespan) && keep(d));
    }

    /// Number of stored demands, stale ones included
    pub fn len(&self) -> usize {
        self.demands.lock().len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<D: Demand + Clone> DemandCollection<D> {
    /// Stored demand of a peer
    pub fn get(&self, address: &Address) -> Option<D> {
        self.demands.lock().get(address).cloned()
    }
}
