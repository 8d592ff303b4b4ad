//! In-memory chain and pools

use std::collections::{HashMap, HashSet};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fugue_primitives::{BlockHeight, H256};
use parking_lot::RwLock;
use tracing::debug;

use crate::block::{Block, BlockCommit, BlockSummary};
use crate::chain::{Blockchain, ContentPool, PoolEvent, PoolItem};
use crate::error::{ChainError, ChainResult};
use crate::event::{Handler, Observers, Subscription};
use crate::evidence::EvidenceId;
use crate::transaction::TxId;

struct ChainInner {
    blocks: HashMap<H256, Block>,
    commits: HashMap<H256, BlockCommit>,
    canonical: Vec<H256>,
    transactions: HashSet<TxId>,
    evidence: HashSet<EvidenceId>,
}

/// Single-branch chain kept in memory
pub struct MemoryChain {
    inner: RwLock<ChainInner>,
}

impl MemoryChain {
    /// Chain holding only `genesis`
    pub fn new(genesis: Block) -> Self {
        let hash = genesis.hash();
        let commit = BlockCommit::for_block(&genesis);
        let mut blocks = HashMap::new();
        let mut commits = HashMap::new();
        blocks.insert(hash, genesis);
        commits.insert(hash, commit);
        Self {
            inner: RwLock::new(ChainInner {
                blocks,
                commits,
                canonical: vec![hash],
                transactions: HashSet::new(),
                evidence: HashSet::new(),
            }),
        }
    }

    /// Number of blocks including genesis
    pub fn len(&self) -> usize {
        self.inner.read().canonical.len()
    }

    /// Always false; a chain has at least its genesis
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl Blockchain for MemoryChain {
    fn genesis_hash(&self) -> H256 {
        self.inner.read().canonical[0]
    }

    fn tip(&self) -> BlockSummary {
        let inner = self.inner.read();
        let hash = inner.canonical[inner.canonical.len() - 1];
        inner.blocks[&hash].summary()
    }

    fn contains_block(&self, hash: &H256) -> bool {
        self.inner.read().blocks.contains_key(hash)
    }

    fn block(&self, hash: &H256) -> Option<Block> {
        self.inner.read().blocks.get(hash).cloned()
    }

    fn block_commit(&self, hash: &H256) -> Option<BlockCommit> {
        self.inner.read().commits.get(hash).cloned()
    }

    fn block_hash_at(&self, height: BlockHeight) -> Option<H256> {
        self.inner.read().canonical.get(height as usize).copied()
    }

    fn contains_transaction(&self, id: &TxId) -> bool {
        self.inner.read().transactions.contains(id)
    }

    fn contains_evidence(&self, id: &EvidenceId) -> bool {
        self.inner.read().evidence.contains(id)
    }

    fn append(&self, block: Block, commit: BlockCommit) -> ChainResult<()> {
        let hash = block.hash();
        if !commit.matches(&block) {
            return Err(ChainError::CommitMismatch(hash));
        }
        if !commit.verify_votes() {
            return Err(ChainError::InvalidBlock {
                hash,
                reason: "invalid commit vote".into(),
            });
        }
        if !block.verify_roots() {
            return Err(ChainError::InvalidBlock {
                hash,
                reason: "content roots do not match header".into(),
            });
        }
        if let Some(tx) = block.transactions.iter().find(|tx| !tx.verify_signature()) {
            return Err(ChainError::InvalidBlock {
                hash,
                reason: format!("bad signature on transaction {}", tx.id()),
            });
        }

        let mut inner = self.inner.write();
        if inner.blocks.contains_key(&hash) {
            return Err(ChainError::AlreadyExists(hash));
        }
        let tip = inner.canonical[inner.canonical.len() - 1];
        let tip_height = (inner.canonical.len() - 1) as u64;
        if block.header.parent_hash != tip {
            return Err(ChainError::UnknownParent { hash, tip });
        }
        if block.height() != tip_height + 1 {
            return Err(ChainError::InvalidHeight {
                expected: tip_height + 1,
                got: block.height(),
            });
        }

        for tx in &block.transactions {
            inner.transactions.insert(tx.id());
        }
        for ev in &block.evidence {
            inner.evidence.insert(ev.id());
        }
        debug!(height = block.height(), hash = %hash.short(), "Block appended");
        inner.canonical.push(hash);
        inner.commits.insert(hash, commit);
        inner.blocks.insert(hash, block);
        Ok(())
    }
}

/// Concurrent pool of pending items
pub struct MemoryPool<T: PoolItem> {
    items: DashMap<H256, T>,
    observers: Observers<PoolEvent>,
}

impl<T: PoolItem> MemoryPool<T> {
    /// Empty pool
    pub fn new() -> Self {
        Self {
            items: DashMap::new(),
            observers: Observers::new(),
        }
    }
}

impl<T: PoolItem> Default for MemoryPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PoolItem> ContentPool<T> for MemoryPool<T> {
    fn contains(&self, id: &H256) -> bool {
        self.items.contains_key(id)
    }

    fn get(&self, id: &H256) -> Option<T> {
        self.items.get(id).map(|r| r.value().clone())
    }

    fn try_add(&self, item: T) -> bool {
        if !item.is_valid() {
            return false;
        }
        let id = item.item_id();
        let added = match self.items.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(item);
                true
            }
        };
        // emit outside the shard lock
        if added {
            self.observers.emit(&PoolEvent::Added(id));
        }
        added
    }

    fn remove(&self, id: &H256) -> Option<T> {
        let removed = self.items.remove(id).map(|(_, item)| item);
        if removed.is_some() {
            self.observers.emit(&PoolEvent::Removed(*id));
        }
        removed
    }

    fn ids(&self) -> Vec<H256> {
        self.items.iter().map(|r| *r.key()).collect()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn subscribe(&self, handler: Handler<PoolEvent>) -> Subscription {
        self.observers.subscribe_handler(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::Evidence;
    use crate::transaction::Transaction;
    use fugue_crypto::random_private_key;
    use fugue_primitives::Address;
    use std::sync::Arc;

    fn proposer() -> Address {
        Address::from_bytes([7u8; 20])
    }

    fn chain_with(n: u64) -> (MemoryChain, Vec<Block>) {
        let genesis = Block::genesis(proposer(), 0);
        let chain = MemoryChain::new(genesis.clone());
        let mut blocks = vec![genesis];
        for i in 1..=n {
            let block = Block::next(&blocks[blocks.len() - 1], proposer(), i, vec![], vec![]);
            chain.append(block.clone(), BlockCommit::for_block(&block)).unwrap();
            blocks.push(block);
        }
        (chain, blocks)
    }

    // ==================== Chain tests ====================

    #[test]
    fn test_new_chain_tip_is_genesis() {
        let (chain, blocks) = chain_with(0);
        assert_eq!(chain.tip().hash, blocks[0].hash());
        assert_eq!(chain.genesis_hash(), blocks[0].hash());
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_append_in_order() {
        let (chain, blocks) = chain_with(3);
        assert_eq!(chain.tip().height, 3);
        assert_eq!(chain.block_hash_at(2), Some(blocks[2].hash()));
        assert!(chain.contains_block(&blocks[3].hash()));
        assert!(chain.block_commit(&blocks[3].hash()).is_some());
    }

    #[test]
    fn test_append_rejects_gap() {
        let (chain, blocks) = chain_with(1);
        let b2 = Block::next(&blocks[1], proposer(), 2, vec![], vec![]);
        let b3 = Block::next(&b2, proposer(), 3, vec![], vec![]);
        let result = chain.append(b3.clone(), BlockCommit::for_block(&b3));
        assert!(matches!(result, Err(ChainError::UnknownParent { .. })));
    }

    #[test]
    fn test_append_rejects_mismatched_commit() {
        let (chain, blocks) = chain_with(1);
        let b2 = Block::next(&blocks[1], proposer(), 2, vec![], vec![]);
        let result = chain.append(b2, BlockCommit::for_block(&blocks[1]));
        assert!(matches!(result, Err(ChainError::CommitMismatch(_))));
    }

    #[test]
    fn test_append_rejects_duplicate() {
        let (chain, blocks) = chain_with(1);
        let result = chain.append(blocks[1].clone(), BlockCommit::for_block(&blocks[1]));
        assert!(matches!(result, Err(ChainError::AlreadyExists(_))));
    }

    #[test]
    fn test_append_indexes_content() {
        let (chain, blocks) = chain_with(0);
        let key = random_private_key();
        let tx = Transaction::signed(&key, 0, 1, vec![1]).unwrap();
        let ev = Evidence::new(0, proposer(), 1, vec![1]);
        let b1 = Block::next(&blocks[0], proposer(), 1, vec![tx.clone()], vec![ev.clone()]);
        chain.append(b1.clone(), BlockCommit::for_block(&b1)).unwrap();
        assert!(chain.contains_transaction(&tx.id()));
        assert!(chain.contains_evidence(&ev.id()));
    }

    #[test]
    fn test_locator_starts_at_tip_and_ends_at_genesis() {
        let (chain, blocks) = chain_with(30);
        let locator = chain.locator();
        assert_eq!(locator[0], blocks[30].hash());
        assert_eq!(locator[locator.len() - 1], blocks[0].hash());
        assert!(locator.len() < 31);
    }

    #[test]
    fn test_find_next_hashes() {
        let (chain, blocks) = chain_with(5);
        let next = chain.find_next_hashes(&[blocks[2].hash()], 10);
        assert_eq!(next, vec![blocks[3].hash(), blocks[4].hash(), blocks[5].hash()]);

        let limited = chain.find_next_hashes(&[blocks[0].hash()], 2);
        assert_eq!(limited, vec![blocks[1].hash(), blocks[2].hash()]);

        assert!(chain.find_next_hashes(&[H256::from_bytes([1u8; 32])], 10).is_empty());
    }

    // ==================== Pool tests ====================

    #[test]
    fn test_pool_try_add_and_dedup() {
        let pool = MemoryPool::<Transaction>::new();
        let tx = Transaction::signed(&random_private_key(), 0, 1, vec![]).unwrap();
        assert!(pool.try_add(tx.clone()));
        assert!(!pool.try_add(tx.clone()));
        assert!(pool.contains(&tx.id()));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_pool_rejects_invalid() {
        let pool = MemoryPool::<Transaction>::new();
        let mut tx = Transaction::signed(&random_private_key(), 0, 1, vec![]).unwrap();
        tx.nonce = 9;
        assert!(!pool.try_add(tx));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_pool_notifies() {
        let pool = MemoryPool::<Evidence>::new();
        let events = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let _sub = pool.subscribe(Arc::new(move |e: &PoolEvent| sink.lock().push(*e)));

        let ev = Evidence::new(1, proposer(), 1, vec![1]);
        pool.try_add(ev.clone());
        pool.remove(&ev.id());

        assert_eq!(
            *events.lock(),
            vec![PoolEvent::Added(ev.id()), PoolEvent::Removed(ev.id())]
        );
    }
}
