//! # fugue-types
//!
//! Content types carried by the sync layer and the chain interfaces it
//! consumes.
//!
//! ```text
//!   Block ──┬── BlockHeader ── hash() = keccak256(bincode(header))
//!           ├── Vec<Transaction>      id = keccak256(bincode(tx))
//!           └── Vec<Evidence>         id = keccak256(bincode(evidence))
//!   BlockCommit ── votes over (height, round, block_hash)
//!
//!   Blockchain (trait) ◄── MemoryChain
//!   ContentPool<T> (trait) ◄── MemoryPool<T>   (staged txs, pending evidence)
//! ```
//!
//! Every content id is the Keccak-256 digest of the value's canonical
//! bincode encoding, so two nodes always agree on ids without coordination.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod chain;
pub mod codec;
pub mod event;
pub mod evidence;
pub mod memory;
pub mod transaction;
mod error;

pub use block::{Block, BlockCommit, BlockHeader, BlockSummary, Vote};
pub use chain::{Blockchain, ContentPool, PoolEvent, PoolItem};
pub use codec::{content_hash, decode, encode};
pub use error::{ChainError, ChainResult};
pub use event::{Handler, Observers, Subscription};
pub use evidence::{Evidence, EvidenceId};
pub use memory::{MemoryChain, MemoryPool};
pub use transaction::{Transaction, TxId};
