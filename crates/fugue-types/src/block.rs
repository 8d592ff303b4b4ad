//! Block types

use fugue_crypto::{address_of, recover_address, sign, CryptoError, PrivateKey, Signature};
use fugue_primitives::{Address, BlockHeight, H256};
use serde::{Deserialize, Serialize};

use crate::codec::content_hash;
use crate::evidence::Evidence;
use crate::transaction::Transaction;

/// Block header
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block height, genesis is 0
    pub height: BlockHeight,
    /// Parent block hash (zero for genesis)
    pub parent_hash: H256,
    /// Block timestamp (unix ms)
    pub timestamp: u64,
    /// Proposer address
    pub proposer: Address,
    /// Hash of the ordered transaction ids
    pub tx_root: H256,
    /// Hash of the ordered evidence ids
    pub evidence_root: H256,
}

impl BlockHeader {
    /// Block hash
    pub fn hash(&self) -> H256 {
        content_hash(self)
    }
}

/// Complete block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Header
    pub header: BlockHeader,
    /// Transactions in execution order
    pub transactions: Vec<Transaction>,
    /// Evidence committed in this block
    pub evidence: Vec<Evidence>,
}

/// Tip advertisement: enough to decide whether a peer is ahead of us.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Height
    pub height: BlockHeight,
    /// Block hash
    pub hash: H256,
    /// Block timestamp (unix ms)
    pub timestamp: u64,
}

fn tx_root(transactions: &[Transaction]) -> H256 {
    let ids: Vec<H256> = transactions.iter().map(Transaction::id).collect();
    content_hash(&ids)
}

fn evidence_root(evidence: &[Evidence]) -> H256 {
    let ids: Vec<H256> = evidence.iter().map(Evidence::id).collect();
    content_hash(&ids)
}

impl Block {
    /// Empty genesis block. Nodes that agree on the arguments agree on the hash.
    pub fn genesis(proposer: Address, timestamp: u64) -> Self {
        Self {
            header: BlockHeader {
                height: 0,
                parent_hash: H256::ZERO,
                timestamp,
                proposer,
                tx_root: tx_root(&[]),
                evidence_root: evidence_root(&[]),
            },
            transactions: Vec::new(),
            evidence: Vec::new(),
        }
    }

    /// Child of `parent` carrying the given content.
    pub fn next(
        parent: &Block,
        proposer: Address,
        timestamp: u64,
        transactions: Vec<Transaction>,
        evidence: Vec<Evidence>,
    ) -> Self {
        Self {
            header: BlockHeader {
                height: parent.height() + 1,
                parent_hash: parent.hash(),
                timestamp,
                proposer,
                tx_root: tx_root(&transactions),
                evidence_root: evidence_root(&evidence),
            },
            transactions,
            evidence,
        }
    }

    /// Block hash (hash of the header)
    pub fn hash(&self) -> H256 {
        self.header.hash()
    }

    /// Block height
    pub fn height(&self) -> BlockHeight {
        self.header.height
    }

    /// Summary used for tip advertisements
    pub fn summary(&self) -> BlockSummary {
        BlockSummary {
            height: self.header.height,
            hash: self.hash(),
            timestamp: self.header.timestamp,
        }
    }

    /// Check that the body matches the roots committed in the header.
    pub fn verify_roots(&self) -> bool {
        self.header.tx_root == tx_root(&self.transactions)
            && self.header.evidence_root == evidence_root(&self.evidence)
    }
}

/// A validator's vote for a block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Voting validator
    pub validator: Address,
    /// Signature over (height, round, block_hash)
    pub signature: Signature,
}

impl Vote {
    fn signing_hash(height: BlockHeight, round: u32, block_hash: &H256) -> H256 {
        content_hash(&(height, round, block_hash))
    }

    /// Sign a vote for `block_hash`.
    pub fn sign(
        key: &PrivateKey,
        height: BlockHeight,
        round: u32,
        block_hash: &H256,
    ) -> Result<Self, CryptoError> {
        let signature = sign(&Self::signing_hash(height, round, block_hash), key)?;
        Ok(Self {
            validator: address_of(key),
            signature,
        })
    }

    /// True if the vote was signed by `validator` for the given block.
    pub fn verify(&self, height: BlockHeight, round: u32, block_hash: &H256) -> bool {
        let hash = Self::signing_hash(height, round, block_hash);
        matches!(recover_address(&hash, &self.signature), Ok(addr) if addr == self.validator)
    }
}

/// Proof that a block was committed by consensus.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCommit {
    /// Height of the committed block
    pub height: BlockHeight,
    /// Consensus round
    pub round: u32,
    /// Hash of the committed block
    pub block_hash: H256,
    /// Precommit votes
    pub votes: Vec<Vote>,
}

impl BlockCommit {
    /// Commit for `block` without votes.
    pub fn for_block(block: &Block) -> Self {
        Self {
            height: block.height(),
            round: 0,
            block_hash: block.hash(),
            votes: Vec::new(),
        }
    }

    /// Commit for `block` signed by each of `validators`.
    pub fn signed(block: &Block, round: u32, validators: &[PrivateKey]) -> Result<Self, CryptoError> {
        let hash = block.hash();
        let votes = validators
            .iter()
            .map(|key| Vote::sign(key, block.height(), round, &hash))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            height: block.height(),
            round,
            block_hash: hash,
            votes,
        })
    }

    /// True if this commit certifies `block`.
    pub fn matches(&self, block: &Block) -> bool {
        self.height == block.height() && self.block_hash == block.hash()
    }

    /// True if every vote is a valid signature for this commit's block.
    pub fn verify_votes(&self) -> bool {
        self.votes
            .iter()
            .all(|vote| vote.verify(self.height, self.round, &self.block_hash))
    }
}
