//! Chain and codec errors

use fugue_primitives::H256;
use thiserror::Error;

/// Errors from the chain interface and the canonical codec
#[derive(Debug, Error)]
pub enum ChainError {
    /// Encoding or decoding failed
    #[error("codec error: {0}")]
    Codec(String),

    /// Block is already part of the chain
    #[error("block already exists: {0}")]
    AlreadyExists(H256),

    /// Block does not extend the current tip
    #[error("block {hash} does not extend tip {tip}")]
    UnknownParent {
        /// Offending block
        hash: H256,
        /// Current tip hash
        tip: H256,
    },

    /// Block height is not tip + 1
    #[error("invalid block height: expected {expected}, got {got}")]
    InvalidHeight {
        /// Expected height
        expected: u64,
        /// Actual height
        got: u64,
    },

    /// Commit does not certify the block it came with
    #[error("commit does not match block {0}")]
    CommitMismatch(H256),

    /// Block body does not match its header
    #[error("invalid block {hash}: {reason}")]
    InvalidBlock {
        /// Offending block
        hash: H256,
        /// What failed
        reason: String,
    },
}

/// Result type for chain operations
pub type ChainResult<T> = Result<T, ChainError>;
