//! Network error types

use fugue_primitives::Address;
use thiserror::Error;

/// Network errors
#[derive(Debug, Error)]
pub enum NetworkError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame or payload could not be encoded/decoded
    #[error("codec error: {0}")]
    Codec(String),

    /// Peer did not answer in time
    #[error("timeout: {0}")]
    Timeout(String),

    /// Connection failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Lookup exhausted without finding the address
    #[error("peer not found: {0}")]
    PeerNotFound(Address),

    /// Caller passed an argument that can never be valid
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Remote runs an incompatible protocol version
    #[error("invalid protocol: {0}")]
    InvalidProtocol(String),

    /// Envelope timestamp outside the accepted clock-skew window
    #[error("invalid message timestamp {timestamp} (now {now}, buffer {buffer_ms}ms)")]
    InvalidMessageTimestamp {
        /// Envelope timestamp (unix ms)
        timestamp: u64,
        /// Local time at validation (unix ms)
        now: u64,
        /// Accepted skew
        buffer_ms: u64,
    },

    /// Envelope signature does not match the sender
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Malformed or unexpected message
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Bootstrap could not reach any seed
    #[error("peer discovery failed: {0}")]
    Discovery(String),

    /// Operation cancelled by its token
    #[error("operation cancelled")]
    Cancelled,

    /// Service is not running
    #[error("service not running")]
    NotRunning,

    /// Service is already running
    #[error("service already running")]
    AlreadyRunning,
}

impl NetworkError {
    /// Transport-level failure that says the peer is unreachable.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            NetworkError::Timeout(_) | NetworkError::ConnectionFailed(_) | NetworkError::Io(_)
        )
    }
}

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;
