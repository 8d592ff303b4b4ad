use std::collections::VecDeque;

use fugue_primitives::Address;
use rand::seq::IteratorRandom;
use rand::Rng;

use crate::peer::{Peer, PeerState};

/// Outcome of [`KBucket::add_or_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketInsert {
    /// New peer appended as newest
    Inserted,
    /// Known peer refreshed and moved to newest
    Updated,
    /// Bucket full, peer not stored
    Full,
}

/// Capacity-bounded list of peers, oldest first.
#[derive(Debug, Clone)]
pub struct KBucket {
    capacity: usize,
    entries: VecDeque<PeerState>,
}

impl KBucket {
    /// Empty bucket holding at most `capacity` peers
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Number of peers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no peers
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if at capacity
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    fn position(&self, address: &Address) -> Option<usize> {
        self.entries.iter().position(|s| s.peer.address == *address)
    }

    /// True if the address is stored
    pub fn contains(&self, address: &Address) -> bool {
        self.position(address).is_some()
    }

    /// State of a stored peer
    pub fn get(&self, address: &Address) -> Option<&PeerState> {
        self.entries.iter().find(|s| s.peer.address == *address)
    }

    /// Insert a new peer or refresh a known one. A full bucket never evicts.
    pub fn add_or_update(&mut self, state: PeerState) -> BucketInsert {
        if let Some(pos) = self.position(&state.peer.address) {
            let mut existing = match self.entries.remove(pos) {
                Some(existing) => existing,
                None => return BucketInsert::Full,
            };
            existing.peer = state.peer;
            existing.last_updated = state.last_updated;
            if state.last_checked.is_some() {
                existing.last_checked = state.last_checked;
                existing.latency = state.latency;
            }
            self.entries.push_back(existing);
            return BucketInsert::Updated;
        }
        if self.is_full() {
            return BucketInsert::Full;
        }
        self.entries.push_back(state);
        BucketInsert::Inserted
    }

    /// Insert as newest, evicting the oldest entry when full. Used by the
    /// replacement cache. Returns the evicted entry.
    pub fn push_evicting(&mut self, state: PeerState) -> Option<PeerState> {
        if let Some(pos) = self.position(&state.peer.address) {
            self.entries.remove(pos);
            self.entries.push_back(state);
            return None;
        }
        let evicted = if self.is_full() {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(state);
        evicted
    }

    /// Remove a peer
    pub fn remove(&mut self, address: &Address) -> Option<PeerState> {
        let pos = self.position(address)?;
        self.entries.remove(pos)
    }

    /// Least recently updated peer
    pub fn oldest(&self) -> Option<&PeerState> {
        self.entries.front()
    }

    /// Most recently updated peer
    pub fn newest(&self) -> Option<&PeerState> {
        self.entries.back()
    }

    /// Remove and return the oldest peer
    pub fn pop_oldest(&mut self) -> Option<PeerState> {
        self.entries.pop_front()
    }

    /// Random peer not matching `skip`
    pub fn random_peer<R, F>(&self, rng: &mut R, skip: F) -> Option<Peer>
    where
        R: Rng + ?Sized,
        F: Fn(&Peer) -> bool,
    {
        self.entries
            .iter()
            .map(|s| s.peer)
            .filter(|p| !skip(p))
            .choose(rng)
    }

    /// Entries oldest first
    pub fn iter(&self) -> impl Iterator<Item = &PeerState> {
        self.entries.iter()
    }
}
