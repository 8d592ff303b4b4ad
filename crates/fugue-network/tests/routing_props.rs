//! Property tests for the routing table

use std::collections::HashSet;
use std::net::SocketAddr;

use fugue_network::{Peer, PeerState, RoutingTable};
use fugue_primitives::Address;
use proptest::prelude::*;

fn peer(address: Address) -> Peer {
    let endpoint: SocketAddr = "127.0.0.1:9000".parse().unwrap();
    Peer::new(address, endpoint)
}

fn address_strategy() -> impl Strategy<Value = Address> {
    prop::array::uniform20(any::<u8>()).prop_map(Address::from_bytes)
}

proptest! {
    #[test]
    fn prop_buckets_never_exceed_capacity(
        addresses in prop::collection::vec(address_strategy(), 1..200),
        bucket_size in 1usize..8,
    ) {
        let owner = Address::ZERO;
        let table = RoutingTable::new(owner, 160, bucket_size).unwrap();
        for address in addresses.iter().filter(|a| **a != owner) {
            let _ = table.add_or_update(PeerState::new(peer(*address)));
        }
        for index in 0..table.table_size() {
            prop_assert!(table.bucket(index).len() <= bucket_size);
        }
    }

    #[test]
    fn prop_full_bucket_keeps_existing_members(
        addresses in prop::collection::vec(address_strategy(), 1..64),
    ) {
        // Single bucket so every peer competes for the same slots
        let owner = Address::ZERO;
        let table = RoutingTable::new(owner, 1, 4).unwrap();
        let mut admitted = Vec::new();
        for address in addresses.iter().filter(|a| **a != owner) {
            let stored = table.add_or_update(PeerState::new(peer(*address))).unwrap();
            if stored && !admitted.contains(address) {
                admitted.push(*address);
            }
        }
        let stored: HashSet<Address> = table.peers().iter().map(|p| p.address).collect();
        let expected: HashSet<Address> = admitted.into_iter().collect();
        prop_assert_eq!(stored, expected);
    }

    #[test]
    fn prop_neighbors_sorted_by_distance(
        addresses in prop::collection::vec(address_strategy(), 1..50),
        target in address_strategy(),
    ) {
        let owner = Address::ZERO;
        let table = RoutingTable::new(owner, 160, 16).unwrap();
        for address in addresses.iter().filter(|a| **a != owner) {
            let _ = table.add(peer(*address));
        }
        let found = table.neighbors(&target, 10, true);
        for pair in found.windows(2) {
            prop_assert!(pair[0].address.xor_distance(&target) <= pair[1].address.xor_distance(&target));
        }
    }
}
