//! Synchronization settings

use std::time::Duration;

/// Timings and limits for every synchronization service.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Delay between block resolve/append cycles
    pub block_sync_interval: Duration,
    /// Delay between transaction fetch cycles
    pub tx_sync_interval: Duration,
    /// Delay between evidence fetch cycles
    pub evidence_sync_interval: Duration,
    /// Delay between consensus gossip fetch cycles
    pub gossip_sync_interval: Duration,
    /// Delay between id advertisements
    pub broadcast_interval: Duration,
    /// Age after which a block demand is ignored
    pub block_demand_lifespan: Duration,
    /// Age after which a transaction, evidence or gossip demand is ignored
    pub content_demand_lifespan: Duration,
    /// Timeout of one fetch or hash request
    pub fetch_timeout: Duration,
    /// Items per reply chunk
    pub chunk_size: u32,
    /// Maximum hashes returned for one locator
    pub block_hash_limit: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            block_sync_interval: Duration::from_millis(1000),
            tx_sync_interval: Duration::from_millis(500),
            evidence_sync_interval: Duration::from_millis(1000),
            gossip_sync_interval: Duration::from_millis(100),
            broadcast_interval: Duration::from_millis(500),
            block_demand_lifespan: Duration::from_secs(60),
            content_demand_lifespan: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
            chunk_size: 100,
            block_hash_limit: 500,
        }
    }
}

impl SyncConfig {
    /// Chunk size as a slice length; never zero
    pub fn chunk_len(&self) -> usize {
        (self.chunk_size as usize).max(1)
    }
}
