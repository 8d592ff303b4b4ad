//! Kademlia routing table.
//!
//! Peers are bucketed by the length of the prefix they share with the
//! owner's address. Each bucket keeps at most `BUCKET_SIZE` peers ordered
//! oldest to newest; peers that do not fit wait in a parallel replacement
//! cache until a bucket member is confirmed dead.

mod bucket;
mod table;

pub use bucket::{BucketInsert, KBucket};
pub use table::{RoutingTable, BUCKET_SIZE, TABLE_SIZE};
