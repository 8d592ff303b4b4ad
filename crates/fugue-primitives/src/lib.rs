//! # fugue-primitives
//!
//! Primitive types shared by every Fugue crate.
//!
//! Peer identities and content owners live in the same 160-bit [`Address`]
//! space, so the routing table can order both by XOR distance.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod address;
mod hash;

pub use address::{Address, AddressError};
pub use hash::{HashError, H256};

/// Block height type
pub type BlockHeight = u64;
