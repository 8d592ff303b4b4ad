//! Wire messages

use fugue_primitives::{Address, H256};
use fugue_types::{content_hash, Block, BlockCommit, BlockSummary, Evidence, PoolItem, Transaction};
use serde::{Deserialize, Serialize};

use crate::error::{NetworkError, NetworkResult};
use crate::peer::Peer;

/// Content-derived message id
pub type MessageId = H256;

/// Opaque consensus message carried by gossip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusPayload {
    /// Height the message belongs to
    pub height: u64,
    /// Round the message belongs to
    pub round: u32,
    /// Originating validator
    pub sender: Address,
    /// Encoded consensus message
    pub data: Vec<u8>,
}

impl ConsensusPayload {
    /// Content id
    pub fn id(&self) -> MessageId {
        content_hash(self)
    }
}

impl PoolItem for ConsensusPayload {
    fn item_id(&self) -> H256 {
        self.id()
    }
}

/// Every message exchanged between peers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Liveness probe
    Ping,
    /// Reply to [`Message::Ping`]
    Pong,
    /// Ask for the peers nearest to `target`
    FindNeighbors {
        /// Lookup target
        target: Address,
    },
    /// Reply to [`Message::FindNeighbors`]
    Neighbors {
        /// Nearest known peers
        found: Vec<Peer>,
    },
    /// Ask for genesis and tip
    GetChainStatus,
    /// Reply to [`Message::GetChainStatus`]
    ChainStatus {
        /// Genesis hash of the sender's chain
        genesis_hash: H256,
        /// Sender's tip
        tip: BlockSummary,
    },
    /// Tip advertisement
    BlockSummary {
        /// Genesis hash of the sender's chain
        genesis_hash: H256,
        /// Sender's tip
        summary: BlockSummary,
    },
    /// Ask for the hashes following the first known locator entry
    GetBlockHashes {
        /// Block locator, tip first
        locator: Vec<H256>,
    },
    /// Reply to [`Message::GetBlockHashes`]
    BlockHashes {
        /// Hashes in height order
        hashes: Vec<H256>,
    },
    /// Ask for blocks and their commits
    BlockRequest {
        /// Requested hashes
        block_hashes: Vec<H256>,
        /// Blocks per reply chunk
        chunk_size: u32,
    },
    /// One chunk of blocks
    BlockResponse {
        /// Blocks
        blocks: Vec<Block>,
        /// Commits, parallel to `blocks`
        commits: Vec<BlockCommit>,
        /// Last chunk of the reply
        is_last: bool,
    },
    /// Advertise staged transactions
    TxIds {
        /// Transaction ids
        ids: Vec<H256>,
    },
    /// Ask for transactions
    TransactionRequest {
        /// Requested ids
        tx_ids: Vec<H256>,
    },
    /// One chunk of transactions
    TransactionResponse {
        /// Transactions
        transactions: Vec<Transaction>,
        /// Last chunk of the reply
        is_last: bool,
    },
    /// Advertise pending evidence
    EvidenceIds {
        /// Evidence ids
        ids: Vec<H256>,
    },
    /// Ask for evidence
    EvidenceRequest {
        /// Requested ids
        evidence_ids: Vec<H256>,
    },
    /// One chunk of evidence
    EvidenceResponse {
        /// Evidence
        evidence: Vec<Evidence>,
        /// Last chunk of the reply
        is_last: bool,
    },
    /// Advertise consensus messages
    Have {
        /// Consensus payload ids
        ids: Vec<H256>,
    },
    /// Ask for consensus messages
    Want {
        /// Requested ids
        ids: Vec<H256>,
    },
    /// One chunk of consensus messages
    Wanted {
        /// Payloads
        payloads: Vec<ConsensusPayload>,
        /// Last chunk of the reply
        is_last: bool,
    },
    /// Consensus message pushed directly
    Consensus {
        /// Payload
        payload: ConsensusPayload,
    },
}

impl Message {
    /// Keccak-256 of the canonical encoding. Used as the gossip dedup key.
    pub fn id(&self) -> MessageId {
        content_hash(self)
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Ping => "ping",
            Message::Pong => "pong",
            Message::FindNeighbors { .. } => "find_neighbors",
            Message::Neighbors { .. } => "neighbors",
            Message::GetChainStatus => "get_chain_status",
            Message::ChainStatus { .. } => "chain_status",
            Message::BlockSummary { .. } => "block_summary",
            Message::GetBlockHashes { .. } => "get_block_hashes",
            Message::BlockHashes { .. } => "block_hashes",
            Message::BlockRequest { .. } => "block_request",
            Message::BlockResponse { .. } => "block_response",
            Message::TxIds { .. } => "tx_ids",
            Message::TransactionRequest { .. } => "transaction_request",
            Message::TransactionResponse { .. } => "transaction_response",
            Message::EvidenceIds { .. } => "evidence_ids",
            Message::EvidenceRequest { .. } => "evidence_request",
            Message::EvidenceResponse { .. } => "evidence_response",
            Message::Have { .. } => "have",
            Message::Want { .. } => "want",
            Message::Wanted { .. } => "wanted",
            Message::Consensus { .. } => "consensus",
        }
    }

    /// True for the final message of a reply stream. Unchunked replies are
    /// always final.
    pub fn is_last_reply(&self) -> bool {
        match self {
            Message::BlockResponse { is_last, .. }
            | Message::TransactionResponse { is_last, .. }
            | Message::EvidenceResponse { is_last, .. }
            | Message::Wanted { is_last, .. } => *is_last,
            _ => true,
        }
    }

    /// True for messages that are only ever sent as replies
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            Message::Pong
                | Message::Neighbors { .. }
                | Message::ChainStatus { .. }
                | Message::BlockHashes { .. }
                | Message::BlockResponse { .. }
                | Message::TransactionResponse { .. }
                | Message::EvidenceResponse { .. }
                | Message::Wanted { .. }
        )
    }

    /// Structural checks that do not need chain state.
    pub fn validate(&self) -> NetworkResult<()> {
        if let Message::BlockResponse { blocks, commits, .. } = self {
            if blocks.len() != commits.len() {
                return Err(NetworkError::InvalidMessage(format!(
                    "block response carries {} blocks but {} commits",
                    blocks.len(),
                    commits.len()
                )));
            }
            for (i, (block, commit)) in blocks.iter().zip(commits).enumerate() {
                if !commit.matches(block) {
                    return Err(NetworkError::InvalidMessage(format!(
                        "commit {} does not match block {} at height {}",
                        i,
                        block.hash(),
                        block.height()
                    )));
                }
            }
        }
        if let Message::BlockRequest { chunk_size: 0, .. } = self {
            return Err(NetworkError::InvalidMessage("chunk size must be positive".into()));
        }
        Ok(())
    }
}
