//! Peer identity and liveness record

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::{Duration, Instant};

use fugue_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::error::NetworkError;

/// Network-reachable node identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Peer {
    /// Node address
    pub address: Address,
    /// Where the node listens
    pub endpoint: SocketAddr,
}

impl Peer {
    /// Create a new peer
    pub fn new(address: Address, endpoint: SocketAddr) -> Self {
        Self { address, endpoint }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.endpoint)
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Peer({})", self)
    }
}

/// Parses `0x<address>@<host:port>`.
impl FromStr for Peer {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (address, endpoint) = s
            .split_once('@')
            .ok_or_else(|| NetworkError::InvalidArgument(format!("expected <address>@<endpoint>: {}", s)))?;
        let address = Address::from_hex(address)
            .map_err(|e| NetworkError::InvalidArgument(e.to_string()))?;
        let endpoint = endpoint
            .parse()
            .map_err(|e: std::net::AddrParseError| NetworkError::InvalidArgument(e.to_string()))?;
        Ok(Self { address, endpoint })
    }
}

/// Liveness metadata of a peer held in the routing table.
#[derive(Clone, Copy, Debug)]
pub struct PeerState {
    /// The peer
    pub peer: Peer,
    /// Last successful exchange
    pub last_updated: Instant,
    /// Last liveness probe, successful or not
    pub last_checked: Option<Instant>,
    /// Round trip of the last probe
    pub latency: Option<Duration>,
}

impl PeerState {
    /// Fresh state, updated now
    pub fn new(peer: Peer) -> Self {
        Self {
            peer,
            last_updated: Instant::now(),
            last_checked: None,
            latency: None,
        }
    }

    /// State after a successful probe
    pub fn checked(peer: Peer, latency: Duration) -> Self {
        let now = Instant::now();
        Self {
            peer,
            last_updated: now,
            last_checked: Some(now),
            latency: Some(latency),
        }
    }

    /// Address of the peer
    pub fn address(&self) -> Address {
        self.peer.address
    }

    /// True if the last update is older than `threshold`
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.last_updated.elapsed() > threshold
    }
}
