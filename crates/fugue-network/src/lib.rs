//! # fugue-network
//!
//! Peer-to-peer layer for Fugue.
//!
//! This crate provides:
//! - A Kademlia routing table with a replacement cache
//! - Peer discovery, liveness checks and broadcast fan-out
//! - Signed message envelopes and their validation
//! - Request/reply transports (in-process and TCP)
//! - Periodic background services
//!
//! ## Architecture
//!
//! ```text
//! +-------------------+     +--------------------+
//! |   PeerExplorer    | --> |    RoutingTable    |
//! +-------------------+     +--------------------+
//!          |
//! +-------------------+     +--------------------+
//! |     Transport     | <-- |  Inbox (validator  |
//! | (memory | tcp)    |     |   + handler)       |
//! +-------------------+     +--------------------+
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use fugue_network::{ExplorerConfig, PeerExplorer, RoutingTable};
//!
//! let table = Arc::new(RoutingTable::with_defaults(transport.local_peer().address));
//! let explorer = PeerExplorer::new(table, transport, ExplorerConfig::default());
//! explorer.explore(&seeds, MAX_DEPTH, &cancel).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod envelope;
mod error;
pub mod explorer;
pub mod message;
pub mod peer;
pub mod routing;
pub mod service;
pub mod transport;
pub mod validation;

pub use codec::EnvelopeCodec;
pub use envelope::{unix_millis, AppProtocolVersion, MessageEnvelope};
pub use error::{NetworkError, NetworkResult};
pub use explorer::{
    BroadcastOptions, ExplorerConfig, PeerExplorer, RefreshTableTask, ReplacementCacheTask,
    FIND_CONCURRENCY, MAX_DEPTH,
};
pub use message::{ConsensusPayload, Message, MessageId};
pub use peer::{Peer, PeerState};
pub use routing::{RoutingTable, BUCKET_SIZE, TABLE_SIZE};
pub use service::{BackgroundService, BackgroundServices, PeriodicTask, ServiceState};
pub use transport::{
    Inbox, MemoryNetwork, MemoryTransport, MessageHandler, ReplyStream, TcpTransport, Transport,
};
pub use validation::{DifferentVersion, MessageValidator, ValidatorConfig};
