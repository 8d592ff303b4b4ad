use std::collections::HashSet;
use std::time::Duration;

use fugue_primitives::Address;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use tracing::trace;

use super::bucket::{BucketInsert, KBucket};
use crate::error::{NetworkError, NetworkResult};
use crate::peer::{Peer, PeerState};

/// Number of buckets: one per address bit
pub const TABLE_SIZE: usize = 160;

/// Maximum peers per bucket
pub const BUCKET_SIZE: usize = 16;

/// Distance-bucketed directory of known peers.
///
/// Each bucket and each replacement bucket has its own lock, and no method
/// holds more than one of them at a time.
pub struct RoutingTable {
    owner: Address,
    bucket_size: usize,
    buckets: Vec<RwLock<KBucket>>,
    replacements: Vec<RwLock<KBucket>>,
}

impl RoutingTable {
    /// Table for `owner` with `table_size` buckets of `bucket_size` peers.
    pub fn new(owner: Address, table_size: usize, bucket_size: usize) -> NetworkResult<Self> {
        if table_size == 0 || bucket_size == 0 {
            return Err(NetworkError::InvalidArgument(format!(
                "table size ({}) and bucket size ({}) must be positive",
                table_size, bucket_size
            )));
        }
        Ok(Self {
            owner,
            bucket_size,
            buckets: (0..table_size).map(|_| RwLock::new(KBucket::new(bucket_size))).collect(),
            replacements: (0..table_size).map(|_| RwLock::new(KBucket::new(bucket_size))).collect(),
        })
    }

    /// Table with `TABLE_SIZE` buckets of `BUCKET_SIZE`
    pub fn with_defaults(owner: Address) -> Self {
        Self {
            owner,
            bucket_size: BUCKET_SIZE,
            buckets: (0..TABLE_SIZE).map(|_| RwLock::new(KBucket::new(BUCKET_SIZE))).collect(),
            replacements: (0..TABLE_SIZE).map(|_| RwLock::new(KBucket::new(BUCKET_SIZE))).collect(),
        }
    }

    /// Owner address
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// Number of buckets
    pub fn table_size(&self) -> usize {
        self.buckets.len()
    }

    /// Capacity of each bucket
    pub fn bucket_size(&self) -> usize {
        self.bucket_size
    }

    /// Bucket an address belongs to
    pub fn bucket_index(&self, address: &Address) -> usize {
        self.owner
            .common_prefix_len(address)
            .min(self.buckets.len() - 1)
    }

    fn check_not_owner(&self, address: &Address) -> NetworkResult<()> {
        if *address == self.owner {
            return Err(NetworkError::InvalidArgument(format!(
                "cannot add the owner {} to its own routing table",
                address
            )));
        }
        Ok(())
    }

    /// Insert or refresh a peer seen just now.
    pub fn add(&self, peer: Peer) -> NetworkResult<bool> {
        self.add_or_update(PeerState::new(peer))
    }

    /// Insert or refresh a peer.
    ///
    /// Returns `Ok(false)` if the bucket is full and the peer is new; the
    /// caller decides whether it goes to the replacement cache.
    pub fn add_or_update(&self, state: PeerState) -> NetworkResult<bool> {
        let address = state.peer.address;
        self.check_not_owner(&address)?;
        let index = self.bucket_index(&address);

        let outcome = self.buckets[index].write().add_or_update(state);
        match outcome {
            BucketInsert::Inserted | BucketInsert::Updated => {
                self.replacements[index].write().remove(&address);
                trace!(peer = %state.peer, bucket = index, ?outcome, "Routing table updated");
                Ok(true)
            }
            BucketInsert::Full => Ok(false),
        }
    }

    /// Park a peer that did not fit in its bucket.
    pub fn add_to_replacement_cache(&self, state: PeerState) -> NetworkResult<()> {
        let address = state.peer.address;
        self.check_not_owner(&address)?;
        let index = self.bucket_index(&address);
        if self.buckets[index].read().contains(&address) {
            return Ok(());
        }
        if let Some(evicted) = self.replacements[index].write().push_evicting(state) {
            trace!(peer = %evicted.peer, bucket = index, "Evicted from replacement cache");
        }
        Ok(())
    }

    /// Remove a peer. Returns false if it was not stored.
    pub fn remove(&self, peer: &Peer) -> bool {
        let index = self.bucket_index(&peer.address);
        self.buckets[index].write().remove(&peer.address).is_some()
    }

    /// True if the address is in the table (not the replacement cache)
    pub fn contains(&self, address: &Address) -> bool {
        let index = self.bucket_index(address);
        self.buckets[index].read().contains(address)
    }

    /// State of a stored peer
    pub fn get(&self, address: &Address) -> Option<PeerState> {
        let index = self.bucket_index(address);
        self.buckets[index].read().get(address).copied()
    }

    /// Snapshot of one bucket, oldest first
    pub fn bucket(&self, index: usize) -> Vec<PeerState> {
        self.buckets
            .get(index)
            .map(|b| b.read().iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every stored peer state
    pub fn peer_states(&self) -> Vec<PeerState> {
        self.buckets
            .iter()
            .flat_map(|b| b.read().iter().copied().collect::<Vec<_>>())
            .collect()
    }

    /// Every stored peer
    pub fn peers(&self) -> Vec<Peer> {
        self.peer_states().into_iter().map(|s| s.peer).collect()
    }

    /// Number of stored peers
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.read().len()).sum()
    }

    /// True if no peers are stored
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.read().is_empty())
    }

    /// Number of buckets holding at least one peer
    pub fn non_empty_bucket_count(&self) -> usize {
        self.buckets.iter().filter(|b| !b.read().is_empty()).count()
    }

    /// Up to `count` peers nearest to `target` by XOR distance.
    pub fn neighbors(&self, target: &Address, count: usize, include_target: bool) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self
            .peers()
            .into_iter()
            .filter(|p| include_target || p.address != *target)
            .collect();
        peers.sort_by_key(|p| p.address.xor_distance(target));
        peers.truncate(count);
        peers
    }

    /// One random peer per non-empty bucket, padded up to `minimum` from the
    /// rest of the table. Peers in `except` are never chosen.
    pub fn peers_to_broadcast(&self, except: &HashSet<Address>, minimum: usize) -> Vec<Peer> {
        let mut rng = rand::thread_rng();
        let mut chosen: Vec<Peer> = self
            .buckets
            .iter()
            .filter_map(|b| b.read().random_peer(&mut rng, |p| except.contains(&p.address)))
            .collect();

        if chosen.len() < minimum {
            let picked: HashSet<Address> = chosen.iter().map(|p| p.address).collect();
            let mut rest: Vec<Peer> = self
                .peers()
                .into_iter()
                .filter(|p| !except.contains(&p.address) && !picked.contains(&p.address))
                .collect();
            rest.shuffle(&mut rng);
            let missing = minimum - chosen.len();
            chosen.extend(rest.into_iter().take(missing));
        }
        chosen
    }

    /// Peers not updated within `threshold`
    pub fn stale_peers(&self, threshold: Duration) -> Vec<Peer> {
        self.peer_states()
            .into_iter()
            .filter(|s| s.is_stale(threshold))
            .map(|s| s.peer)
            .collect()
    }

    /// Replacement cache content, oldest first across all buckets
    pub fn replacement_candidates(&self) -> Vec<Peer> {
        let mut states: Vec<PeerState> = self
            .replacements
            .iter()
            .flat_map(|b| b.read().iter().copied().collect::<Vec<_>>())
            .collect();
        states.sort_by_key(|s| s.last_updated);
        states.into_iter().map(|s| s.peer).collect()
    }

    /// Remove a peer from the replacement cache
    pub fn take_replacement(&self, address: &Address) -> Option<PeerState> {
        let index = self.bucket_index(address);
        self.replacements[index].write().remove(address)
    }

    /// Remove the oldest replacement candidate of a bucket
    pub fn pop_oldest_replacement(&self, index: usize) -> Option<PeerState> {
        self.replacements.get(index)?.write().pop_oldest()
    }

    /// Number of peers in the replacement cache
    pub fn replacement_len(&self) -> usize {
        self.replacements.iter().map(|b| b.read().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn owner() -> Address {
        Address::ZERO
    }

    fn endpoint(n: u16) -> std::net::SocketAddr {
        format!("127.0.0.1:{}", 2000 + n).parse().unwrap()
    }

    /// Peer in bucket 0 (first bit differs from the zero owner)
    fn far_peer(n: u8) -> Peer {
        let mut bytes = [0u8; 20];
        bytes[0] = 0x80;
        bytes[19] = n;
        Peer::new(Address::from_bytes(bytes), endpoint(n as u16))
    }

    fn peer_with_first(byte: u8) -> Peer {
        let mut bytes = [0u8; 20];
        bytes[0] = byte;
        Peer::new(Address::from_bytes(bytes), endpoint(byte as u16))
    }

    // ==================== Construction ====================

    #[test]
    fn test_new_rejects_zero_sizes() {
        assert!(RoutingTable::new(owner(), 0, 16).is_err());
        assert!(RoutingTable::new(owner(), 160, 0).is_err());
        assert!(RoutingTable::new(owner(), 160, 16).is_ok());
    }

    #[test]
    fn test_bucket_index() {
        let table = RoutingTable::with_defaults(owner());
        assert_eq!(table.bucket_index(&peer_with_first(0x80).address), 0);
        assert_eq!(table.bucket_index(&peer_with_first(0x01).address), 7);

        let mut bytes = [0u8; 20];
        bytes[19] = 1;
        assert_eq!(table.bucket_index(&Address::from_bytes(bytes)), 159);
    }

    #[test]
    fn test_bucket_index_clamped_to_table_size() {
        let table = RoutingTable::new(owner(), 4, 16).unwrap();
        assert_eq!(table.bucket_index(&peer_with_first(0x01).address), 3);
    }

    // ==================== Add / remove ====================

    #[test]
    fn test_add_rejects_owner() {
        let table = RoutingTable::with_defaults(owner());
        let me = Peer::new(owner(), endpoint(0));
        assert!(matches!(table.add(me), Err(NetworkError::InvalidArgument(_))));
        assert!(matches!(
            table.add_to_replacement_cache(PeerState::new(me)),
            Err(NetworkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_full_bucket_rejects_new_peer() {
        let table = RoutingTable::new(owner(), TABLE_SIZE, 2).unwrap();
        assert!(table.add(far_peer(1)).unwrap());
        assert!(table.add(far_peer(2)).unwrap());
        assert!(!table.add(far_peer(3)).unwrap());
        assert_eq!(table.len(), 2);
        assert!(table.contains(&far_peer(1).address));
        assert!(!table.contains(&far_peer(3).address));
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let table = RoutingTable::with_defaults(owner());
        assert!(!table.remove(&far_peer(1)));
        table.add(far_peer(1)).unwrap();
        assert!(table.remove(&far_peer(1)));
        assert!(table.is_empty());
    }

    #[test]
    fn test_update_moves_peer_to_newest() {
        let table = RoutingTable::with_defaults(owner());
        table.add(far_peer(1)).unwrap();
        table.add(far_peer(2)).unwrap();
        table.add(far_peer(1)).unwrap();
        let bucket = table.bucket(0);
        assert_eq!(bucket[0].peer, far_peer(2));
        assert_eq!(bucket[1].peer, far_peer(1));
    }

    // ==================== Replacement cache ====================

    #[test]
    fn test_replacement_cache_roundtrip() {
        let table = RoutingTable::new(owner(), TABLE_SIZE, 1).unwrap();
        table.add(far_peer(1)).unwrap();
        assert!(!table.add(far_peer(2)).unwrap());
        table.add_to_replacement_cache(PeerState::new(far_peer(2))).unwrap();
        assert_eq!(table.replacement_candidates(), vec![far_peer(2)]);

        assert!(table.remove(&far_peer(1)));
        let promoted = table.pop_oldest_replacement(0).unwrap();
        assert!(table.add_or_update(promoted).unwrap());
        assert!(table.contains(&far_peer(2).address));
        assert_eq!(table.replacement_len(), 0);
    }

    #[test]
    fn test_replacement_cache_skips_stored_peer() {
        let table = RoutingTable::with_defaults(owner());
        table.add(far_peer(1)).unwrap();
        table.add_to_replacement_cache(PeerState::new(far_peer(1))).unwrap();
        assert_eq!(table.replacement_len(), 0);
    }

    #[test]
    fn test_insert_clears_replacement_entry() {
        let table = RoutingTable::with_defaults(owner());
        table.add_to_replacement_cache(PeerState::new(far_peer(1))).unwrap();
        table.add(far_peer(1)).unwrap();
        assert!(table.take_replacement(&far_peer(1).address).is_none());
    }

    // ==================== Queries ====================

    #[test]
    fn test_neighbors_sorted_by_distance() {
        let table = RoutingTable::with_defaults(owner());
        for byte in [0x80u8, 0x40, 0x20, 0x10] {
            table.add(peer_with_first(byte)).unwrap();
        }
        let target = Address::ZERO;
        let found = table.neighbors(&target, 3, false);
        let firsts: Vec<u8> = found.iter().map(|p| p.address.as_bytes()[0]).collect();
        assert_eq!(firsts, vec![0x10, 0x20, 0x40]);
    }

    #[test]
    fn test_neighbors_include_target() {
        let table = RoutingTable::with_defaults(owner());
        let p = peer_with_first(0x40);
        table.add(p).unwrap();
        table.add(peer_with_first(0x80)).unwrap();
        assert_eq!(table.neighbors(&p.address, 1, true), vec![p]);
        assert_ne!(table.neighbors(&p.address, 1, false), vec![p]);
    }

    #[test]
    fn test_peers_to_broadcast_one_per_bucket() {
        let table = RoutingTable::with_defaults(owner());
        table.add(far_peer(1)).unwrap();
        table.add(far_peer(2)).unwrap();
        table.add(peer_with_first(0x40)).unwrap();

        let chosen = table.peers_to_broadcast(&HashSet::new(), 0);
        assert_eq!(chosen.len(), 2);
    }

    #[test]
    fn test_peers_to_broadcast_pads_to_minimum() {
        let table = RoutingTable::with_defaults(owner());
        for n in 1..=5 {
            table.add(far_peer(n)).unwrap();
        }
        let chosen = table.peers_to_broadcast(&HashSet::new(), 4);
        assert_eq!(chosen.len(), 4);
        let unique: HashSet<Address> = chosen.iter().map(|p| p.address).collect();
        assert_eq!(unique.len(), 4);
    }

    #[test]
    fn test_peers_to_broadcast_except() {
        let table = RoutingTable::with_defaults(owner());
        table.add(far_peer(1)).unwrap();
        table.add(far_peer(2)).unwrap();
        let except: HashSet<Address> = [far_peer(1).address].into_iter().collect();
        for _ in 0..10 {
            let chosen = table.peers_to_broadcast(&except, 10);
            assert_eq!(chosen, vec![far_peer(2)]);
        }
    }

    #[test]
    fn test_stale_peers() {
        let table = RoutingTable::with_defaults(owner());
        table.add(far_peer(1)).unwrap();
        if let Some(past) = Instant::now().checked_sub(Duration::from_secs(600)) {
            let mut old = PeerState::new(far_peer(2));
            old.last_updated = past;
            table.add_or_update(old).unwrap();
            assert_eq!(table.stale_peers(Duration::from_secs(60)), vec![far_peer(2)]);
        }
    }
}
