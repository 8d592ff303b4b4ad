//! Configuration types for the fugue node

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use fugue_crypto::{keccak256, private_key_from_bytes, random_private_key, PrivateKey};
use fugue_network::{AppProtocolVersion, ExplorerConfig, Peer, ValidatorConfig, MAX_DEPTH};
use fugue_primitives::Address;
use fugue_sync::SyncConfig;
use fugue_types::Block;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    /// File is not valid TOML for [`NodeConfig`]
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is malformed
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending setting
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

fn invalid(field: &'static str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

/// Seed of the development issuer. Its key is public, so versions it signs
/// only suit local networks.
const DEV_ISSUER_SEED: &[u8] = b"fugue development protocol issuer";

/// Key signing the protocol version of nodes configured without a token
pub fn dev_issuer() -> Result<PrivateKey, ConfigError> {
    private_key_from_bytes(keccak256(DEV_ISSUER_SEED).as_bytes())
        .map_err(|e| invalid("p2p.protocol_version", e))
}

/// Hex token of an issued protocol version, the form
/// `p2p.app_protocol_version` takes.
pub fn protocol_token(version: &AppProtocolVersion) -> Result<String, ConfigError> {
    let bytes = version
        .to_bytes()
        .map_err(|e| invalid("p2p.app_protocol_version", e))?;
    Ok(hex::encode(bytes))
}

/// Node configuration, read from TOML. Durations are in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Networking
    pub p2p: P2pConfig,
    /// Peer discovery
    pub discovery: DiscoveryConfig,
    /// Synchronization timings
    pub sync: SyncSettings,
    /// Genesis block parameters
    pub genesis: GenesisConfig,
}

impl NodeConfig {
    /// Read a TOML file. Missing sections keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}

/// P2P network configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// Listen address
    pub listen_addr: SocketAddr,
    /// Address announced to peers, when different from the bound one
    pub public_addr: Option<SocketAddr>,
    /// Bootstrap peers as `0x<address>@<host:port>`
    pub seeds: Vec<String>,
    /// Node key (hex, optional 0x prefix). A fresh key is generated if unset.
    pub private_key: Option<String>,
    /// Signed protocol version issued by the network operator (hex token)
    pub app_protocol_version: Option<String>,
    /// Version signed by the development issuer when no token is set
    pub protocol_version: u32,
    /// Accepted protocol version signers. Empty trusts any.
    pub trusted_signers: Vec<String>,
    /// Accepted clock skew for incoming messages
    pub timestamp_buffer_ms: Option<u64>,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 31234)),
            public_addr: None,
            seeds: Vec::new(),
            private_key: None,
            app_protocol_version: None,
            protocol_version: 1,
            trusted_signers: Vec::new(),
            timestamp_buffer_ms: Some(60_000),
        }
    }
}

impl P2pConfig {
    /// Decode the configured key, or generate one
    pub fn key(&self) -> Result<PrivateKey, ConfigError> {
        let Some(encoded) = &self.private_key else {
            return Ok(random_private_key());
        };
        let encoded = encoded.trim();
        let bytes = hex::decode(encoded.strip_prefix("0x").unwrap_or(encoded))
            .map_err(|e| invalid("p2p.private_key", e))?;
        private_key_from_bytes(&bytes).map_err(|e| invalid("p2p.private_key", e))
    }

    /// Parse the seed list
    pub fn seed_peers(&self) -> Result<Vec<Peer>, ConfigError> {
        self.seeds
            .iter()
            .map(|s| s.trim().parse::<Peer>().map_err(|e| invalid("p2p.seeds", e)))
            .collect()
    }

    /// The protocol version this node announces. An issued token must carry
    /// a valid signature; its signer, or the development issuer without a
    /// token, must be trusted.
    pub fn app_protocol_version(&self) -> Result<AppProtocolVersion, ConfigError> {
        const FIELD: &str = "p2p.app_protocol_version";
        let version = match &self.app_protocol_version {
            Some(token) => {
                let token = token.trim();
                let bytes = hex::decode(token.strip_prefix("0x").unwrap_or(token))
                    .map_err(|e| invalid(FIELD, e))?;
                let version = AppProtocolVersion::from_bytes(&bytes).map_err(|e| invalid(FIELD, e))?;
                if !version.verify() {
                    return Err(invalid(
                        FIELD,
                        format!("signature does not match signer {}", version.signer),
                    ));
                }
                version
            }
            None => AppProtocolVersion::sign(&dev_issuer()?, self.protocol_version, Vec::new())
                .map_err(|e| invalid("p2p.protocol_version", e))?,
        };
        if let Some(signers) = self.validator_config()?.trusted_signers {
            if !signers.contains(&version.signer) {
                return Err(invalid(
                    FIELD,
                    format!("signer {} is not in p2p.trusted_signers", version.signer),
                ));
            }
        }
        Ok(version)
    }

    /// Envelope validation settings
    pub fn validator_config(&self) -> Result<ValidatorConfig, ConfigError> {
        let trusted_signers = if self.trusted_signers.is_empty() {
            None
        } else {
            let signers = self
                .trusted_signers
                .iter()
                .map(|s| Address::from_hex(s.trim()).map_err(|e| invalid("p2p.trusted_signers", e)))
                .collect::<Result<HashSet<_>, _>>()?;
            Some(signers)
        };
        Ok(ValidatorConfig {
            trusted_signers,
            timestamp_buffer: self.timestamp_buffer_ms.map(Duration::from_millis),
        })
    }
}

/// Peer discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Lookup depth when exploring from the seeds
    pub max_depth: usize,
    /// Liveness probe timeout
    pub ping_timeout_ms: u64,
    /// Neighbor lookup timeout
    pub request_timeout_ms: u64,
    /// Fewest peers a broadcast targets
    pub minimum_broadcast_target: usize,
    /// Table refresh period
    pub refresh_interval_ms: u64,
    /// Age after which a peer is probed again
    pub stale_threshold_ms: u64,
    /// Replacement cache check period
    pub replacement_interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        let explorer = ExplorerConfig::default();
        Self {
            max_depth: MAX_DEPTH,
            ping_timeout_ms: explorer.ping_timeout.as_millis() as u64,
            request_timeout_ms: explorer.request_timeout.as_millis() as u64,
            minimum_broadcast_target: explorer.minimum_broadcast_target,
            refresh_interval_ms: 10_000,
            stale_threshold_ms: 60_000,
            replacement_interval_ms: 30_000,
        }
    }
}

impl DiscoveryConfig {
    /// Explorer settings
    pub fn explorer_config(&self) -> ExplorerConfig {
        ExplorerConfig {
            max_depth: self.max_depth,
            ping_timeout: Duration::from_millis(self.ping_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            minimum_broadcast_target: self.minimum_broadcast_target,
            ..ExplorerConfig::default()
        }
    }
}

/// Synchronization timings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Block catch-up period
    pub block_sync_interval_ms: u64,
    /// Transaction pull period
    pub tx_sync_interval_ms: u64,
    /// Evidence pull period
    pub evidence_sync_interval_ms: u64,
    /// Consensus gossip period
    pub gossip_sync_interval_ms: u64,
    /// Advertisement period
    pub broadcast_interval_ms: u64,
    /// Lifespan of a tip advertisement
    pub block_demand_lifespan_ms: u64,
    /// Lifespan of an id advertisement
    pub content_demand_lifespan_ms: u64,
    /// Per-fetch timeout
    pub fetch_timeout_ms: u64,
    /// Items per reply chunk
    pub chunk_size: u32,
    /// Most block hashes asked for at once
    pub block_hash_limit: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        let ms = |d: Duration| d.as_millis() as u64;
        Self {
            block_sync_interval_ms: ms(config.block_sync_interval),
            tx_sync_interval_ms: ms(config.tx_sync_interval),
            evidence_sync_interval_ms: ms(config.evidence_sync_interval),
            gossip_sync_interval_ms: ms(config.gossip_sync_interval),
            broadcast_interval_ms: ms(config.broadcast_interval),
            block_demand_lifespan_ms: ms(config.block_demand_lifespan),
            content_demand_lifespan_ms: ms(config.content_demand_lifespan),
            fetch_timeout_ms: ms(config.fetch_timeout),
            chunk_size: config.chunk_size,
            block_hash_limit: config.block_hash_limit,
        }
    }
}

impl From<&SyncSettings> for SyncConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            block_sync_interval: Duration::from_millis(settings.block_sync_interval_ms),
            tx_sync_interval: Duration::from_millis(settings.tx_sync_interval_ms),
            evidence_sync_interval: Duration::from_millis(settings.evidence_sync_interval_ms),
            gossip_sync_interval: Duration::from_millis(settings.gossip_sync_interval_ms),
            broadcast_interval: Duration::from_millis(settings.broadcast_interval_ms),
            block_demand_lifespan: Duration::from_millis(settings.block_demand_lifespan_ms),
            content_demand_lifespan: Duration::from_millis(settings.content_demand_lifespan_ms),
            fetch_timeout: Duration::from_millis(settings.fetch_timeout_ms),
            chunk_size: settings.chunk_size,
            block_hash_limit: settings.block_hash_limit,
        }
    }
}

/// Genesis block parameters. Nodes of one network must agree on them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    /// Proposer address (hex). Zero when unset.
    pub proposer: Option<String>,
    /// Genesis timestamp (unix ms)
    pub timestamp: u64,
}

impl GenesisConfig {
    /// Build the genesis block
    pub fn block(&self) -> Result<Block, ConfigError> {
        let proposer = match &self.proposer {
            Some(hex) => Address::from_hex(hex.trim()).map_err(|e| invalid("genesis.proposer", e))?,
            None => Address::ZERO,
        };
        Ok(Block::genesis(proposer, self.timestamp))
    }
}
