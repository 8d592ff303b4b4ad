//! Synchronization error types

use fugue_network::NetworkError;
use fugue_primitives::H256;
use fugue_types::ChainError;
use thiserror::Error;

/// Synchronization errors
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport or validation failure
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Chain rejected a block
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    /// Peer follows a different chain
    #[error("genesis mismatch: local {local}, remote {remote}")]
    GenesisMismatch {
        /// Local genesis hash
        local: H256,
        /// Genesis hash advertised by the peer
        remote: H256,
    },

    /// Block branch failed its structural checks
    #[error("invalid branch: {0}")]
    InvalidBranch(String),

    /// Peer answered with a reply of the wrong kind
    #[error("unexpected reply: expected {expected}, got {got}")]
    UnexpectedReply {
        /// Expected message kind
        expected: &'static str,
        /// Received message kind
        got: &'static str,
    },

    /// Operation cancelled by its token
    #[error("operation cancelled")]
    Cancelled,
}

/// Result type for synchronization operations
pub type SyncResult<T> = Result<T, SyncError>;
