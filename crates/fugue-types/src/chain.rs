//! Interfaces the sync layer consumes from the chain and its pending pools

use fugue_primitives::{BlockHeight, H256};

use crate::block::{Block, BlockCommit, BlockSummary};
use crate::error::ChainResult;
use crate::event::{Handler, Subscription};
use crate::evidence::{Evidence, EvidenceId};
use crate::transaction::{Transaction, TxId};

/// Read access and append for the local chain.
///
/// Implementations synchronize internally; every method takes `&self`.
pub trait Blockchain: Send + Sync {
    /// Hash of block 0
    fn genesis_hash(&self) -> H256;

    /// Current tip
    fn tip(&self) -> BlockSummary;

    /// True if the block is on the chain
    fn contains_block(&self, hash: &H256) -> bool;

    /// Block by hash
    fn block(&self, hash: &H256) -> Option<Block>;

    /// Commit for a block
    fn block_commit(&self, hash: &H256) -> Option<BlockCommit>;

    /// Hash of the block at `height`
    fn block_hash_at(&self, height: BlockHeight) -> Option<H256>;

    /// True if the transaction is included in some block
    fn contains_transaction(&self, id: &TxId) -> bool;

    /// True if the evidence is included in some block
    fn contains_evidence(&self, id: &EvidenceId) -> bool;

    /// Append a block on top of the tip.
    fn append(&self, block: Block, commit: BlockCommit) -> ChainResult<()>;

    /// Block locator: tip, then exponentially sparser ancestors, ending at genesis.
    fn locator(&self) -> Vec<H256> {
        let tip = self.tip().height;
        let mut hashes = Vec::new();
        let mut height = tip;
        let mut step = 1u64;
        loop {
            if let Some(hash) = self.block_hash_at(height) {
                hashes.push(hash);
            }
            if height == 0 {
                break;
            }
            if hashes.len() >= 10 {
                step *= 2;
            }
            height = height.saturating_sub(step);
        }
        hashes
    }

    /// Hashes following the first locator entry found on this chain, up to `limit`.
    fn find_next_hashes(&self, locator: &[H256], limit: usize) -> Vec<H256> {
        let branch_point = locator.iter().find_map(|hash| {
            self.block(hash)
                .map(|b| b.height())
                .filter(|h| self.block_hash_at(*h).as_ref() == Some(hash))
        });
        let Some(start) = branch_point else {
            return Vec::new();
        };
        let tip = self.tip().height;
        (start + 1..=tip)
            .take(limit)
            .filter_map(|h| self.block_hash_at(h))
            .collect()
    }
}

/// Pool change notification
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolEvent {
    /// Item staged
    Added(H256),
    /// Item removed
    Removed(H256),
}

/// Something that can live in a [`ContentPool`].
pub trait PoolItem: Clone + Send + Sync + 'static {
    /// Content id
    fn item_id(&self) -> H256;

    /// Domain validation applied before staging
    fn is_valid(&self) -> bool {
        true
    }
}

impl PoolItem for Transaction {
    fn item_id(&self) -> H256 {
        self.id()
    }

    fn is_valid(&self) -> bool {
        self.verify_signature()
    }
}

impl PoolItem for Evidence {
    fn item_id(&self) -> H256 {
        self.id()
    }

    fn is_valid(&self) -> bool {
        self.is_well_formed()
    }
}

/// Thread-safe pending pool (staged transactions, pending evidence, ...).
pub trait ContentPool<T: PoolItem>: Send + Sync {
    /// True if the item is staged
    fn contains(&self, id: &H256) -> bool;

    /// Staged item by id
    fn get(&self, id: &H256) -> Option<T>;

    /// Stage the item. Returns false if it is invalid or already present.
    fn try_add(&self, item: T) -> bool;

    /// Unstage an item
    fn remove(&self, id: &H256) -> Option<T>;

    /// Ids of all staged items
    fn ids(&self) -> Vec<H256>;

    /// Number of staged items
    fn len(&self) -> usize;

    /// True if nothing is staged
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Observe additions and removals
    fn subscribe(&self, handler: Handler<PoolEvent>) -> Subscription;
}
