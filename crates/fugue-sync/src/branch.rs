//! Contiguous block runs waiting to be appended

use std::collections::HashMap;

use fugue_network::Peer;
use fugue_primitives::H256;
use fugue_types::{Block, BlockCommit, BlockSummary};
use parking_lot::Mutex;

use crate::error::{SyncError, SyncResult};

/// Blocks extending a locally known block, each with its commit.
///
/// Construction checks everything that can be checked without the chain,
/// so a malformed branch is rejected before any block is appended.
#[derive(Debug, Clone)]
pub struct BlockBranch {
    branch_point: BlockSummary,
    blocks: Vec<Block>,
    commits: Vec<BlockCommit>,
}

impl BlockBranch {
    /// Validate and build a branch starting right after `branch_point`.
    pub fn new(
        branch_point: BlockSummary,
        blocks: Vec<Block>,
        commits: Vec<BlockCommit>,
    ) -> SyncResult<Self> {
        if blocks.is_empty() {
            return Err(SyncError::InvalidBranch("branch is empty".into()));
        }
        if blocks.len() != commits.len() {
            return Err(SyncError::InvalidBranch(format!(
                "{} blocks but {} commits",
                blocks.len(),
                commits.len()
            )));
        }

        let mut parent = branch_point;
        for (i, (block, commit)) in blocks.iter().zip(&commits).enumerate() {
            let hash = block.hash();
            if commit.block_hash != hash || commit.height != block.height() {
                return Err(SyncError::InvalidBranch(format!(
                    "commit {} does not match block {} at height {}",
                    i,
                    hash.short(),
                    block.height()
                )));
            }
            if block.header.parent_hash != parent.hash || block.height() != parent.height + 1 {
                return Err(SyncError::InvalidBranch(format!(
                    "block {} at height {} does not extend {} at height {}",
                    hash.short(),
                    block.height(),
                    parent.hash.short(),
                    parent.height
                )));
            }
            parent = block.summary();
        }

        Ok(Self {
            branch_point,
            blocks,
            commits,
        })
    }

    /// Local block the branch extends
    pub fn branch_point(&self) -> BlockSummary {
        self.branch_point
    }

    /// Last block of the branch
    pub fn tip(&self) -> BlockSummary {
        self.blocks
            .last()
            .map(Block::summary)
            .unwrap_or(self.branch_point)
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false for a constructed branch
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks in height order
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Consume into `(block, commit)` pairs in height order
    pub fn into_pairs(self) -> impl Iterator<Item = (Block, BlockCommit)> {
        self.blocks.into_iter().zip(self.commits)
    }
}

/// Resolved branches keyed by the local tip they were resolved against.
#[derive(Default)]
pub struct BranchCollection {
    branches: Mutex<HashMap<H256, (Peer, BlockBranch)>>,
}

impl BranchCollection {
    /// Empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a branch. For the same key the longer branch wins.
    /// Returns true if `branch` was kept.
    pub fn add(&self, key: H256, peer: Peer, branch: BlockBranch) -> bool {
        let mut branches = self.branches.lock();
        match branches.get(&key) {
            Some((_, existing)) if existing.tip().height >= branch.tip().height => false,
            _ => {
                branches.insert(key, (peer, branch));
                true
            }
        }
    }

    /// Remove and return every branch
    pub fn take_all(&self) -> Vec<(Peer, BlockBranch)> {
        std::mem::take(&mut *self.branches.lock())
            .into_values()
            .collect()
    }

    /// Drop branches whose tip is at or below `height`
    pub fn prune(&self, height: u64) -> usize {
        let mut branches = self.branches.lock();
        let before = branches.len();
        branches.retain(|_, (_, branch)| branch.tip().height > height);
        before - branches.len()
    }

    /// Number of stored branches
    pub fn len(&self) -> usize {
        self.branches.lock().len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
