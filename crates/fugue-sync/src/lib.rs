//! # fugue-sync
//!
//! Keeps a Fugue node's chain, pools and consensus cache in step with its
//! peers.
//!
//! This crate provides:
//! - A generic fetch-and-verify pipeline with one implementation per content kind
//! - Demand collections fed by peer advertisements
//! - Broadcasters advertising newly staged content
//! - Block catch-up through resolved branches appended in order
//! - Consensus message gossip
//! - The inbound message handler a node registers with its transport
//!
//! ## Architecture
//!
//! ```text
//!   advertisement          +------------------+
//!  ---------------------> | DemandCollection |
//!                          +------------------+
//!                                   | flush
//!                          +------------------+      +-------------+
//!                          |     Fetcher      | ---> | chain/pools |
//!                          +------------------+      +-------------+
//!                                                          | Added
//!                          +------------------+            |
//!  <---------------------  |   Broadcaster    | <----------+
//!   TxIds / EvidenceIds    +------------------+
//!   Have / BlockSummary
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use fugue_sync::{SyncConfig, Synchronizer};
//!
//! let sync = Synchronizer::new(chain, tx_pool, evidence_pool, explorer, SyncConfig::default());
//! transport.attach(Inbox::new(validator, sync.handler()));
//! let services = sync.services();
//! services.start_all()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block_sync;
pub mod branch;
pub mod broadcaster;
pub mod config;
pub mod content_sync;
pub mod demand;
mod error;
pub mod event;
pub mod fetcher;
pub mod gossip;
pub mod handler;
pub mod metrics;
pub mod synchronizer;

#[cfg(test)]
mod testing;

pub use block_sync::{BlockSync, BlockSyncTask};
pub use branch::{BlockBranch, BranchCollection};
pub use broadcaster::{Advertise, BroadcastTask, Broadcaster};
pub use config::SyncConfig;
pub use content_sync::{ContentSync, ContentSyncTask};
pub use demand::{BlockDemand, Demand, DemandCollection, IdDemand};
pub use error::{SyncError, SyncResult};
pub use event::{BroadcastEvent, SyncEvent};
pub use fetcher::{
    BlockFetcher, ContentFetcher, EvidenceFetcher, FetchController, FetchGuard, Fetcher,
    GossipFetcher, TxFetcher,
};
pub use gossip::ConsensusGossip;
pub use handler::SyncHandler;
pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use synchronizer::Synchronizer;
