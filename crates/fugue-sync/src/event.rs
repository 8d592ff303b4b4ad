//! Events emitted by the synchronization services

use fugue_network::Peer;
use fugue_primitives::H256;
use fugue_types::BlockSummary;

/// Outcome of one unit of synchronization work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Items were fetched, verified and staged
    Fetched {
        /// Content kind
        kind: &'static str,
        /// Source peer
        peer: Peer,
        /// Accepted item count
        count: usize,
    },
    /// Fetch from a peer failed
    FetchFailed {
        /// Content kind
        kind: &'static str,
        /// Source peer
        peer: Peer,
        /// Failure description
        error: String,
    },
    /// A block branch was assembled from a peer's blocks
    Resolved {
        /// Source peer
        peer: Peer,
        /// Blocks in the branch
        branch_len: usize,
    },
    /// Building a branch failed
    ResolveFailed {
        /// Source peer
        peer: Peer,
        /// Failure description
        error: String,
    },
    /// Blocks of a branch were appended
    BranchAppended {
        /// Source peer
        peer: Peer,
        /// Blocks appended
        appended: usize,
        /// Local tip afterwards
        tip: BlockSummary,
    },
    /// Appending a branch stopped at a rejected block
    AppendFailed {
        /// Source peer
        peer: Peer,
        /// Blocks appended before the failure
        appended: usize,
        /// Failure description
        error: String,
    },
}

/// An advertisement sent by a broadcaster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastEvent {
    /// Message kind sent
    pub kind: &'static str,
    /// Targeted peers
    pub peers: Vec<Peer>,
    /// Advertised ids
    pub ids: Vec<H256>,
}
