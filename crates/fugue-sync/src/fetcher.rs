//! Generic content pull.
//!
//! A [`ContentFetcher`] describes one content kind: which ids are still
//! missing, how to ask for them, how to unpack the replies and how to verify
//! and stage what arrived. [`Fetcher`] drives the exchange with one peer.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use fugue_network::{ConsensusPayload, Message, Peer, Transport};
use fugue_primitives::{Address, H256};
use fugue_types::{Block, BlockCommit, Blockchain, ContentPool, Evidence, Observers, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{SyncError, SyncResult};

/// One content kind as seen by the pull path.
pub trait ContentFetcher: Send + Sync + 'static {
    /// Fetched item
    type Item: Send + 'static;

    /// Kind name used in logs and events
    fn kind(&self) -> &'static str;

    /// True if `id` is not known locally yet
    fn is_needed(&self, id: &H256) -> bool;

    /// Validate an arrived item and stage it. False for malformed or
    /// duplicate items, which are dropped.
    fn verify(&self, item: &Self::Item) -> bool;

    /// Content id of an item
    fn id_of(&self, item: &Self::Item) -> H256;

    /// Batched request for `ids`
    fn build_request(&self, ids: Vec<H256>) -> Message;

    /// Items carried by one reply
    fn unpack(&self, reply: Message) -> SyncResult<Vec<Self::Item>>;
}

/// Pulls content of one kind from peers.
pub struct Fetcher<F: ContentFetcher> {
    content: F,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl<F: ContentFetcher> Fetcher<F> {
    /// Fetcher whose requests time out after `timeout`
    pub fn new(content: F, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            content,
            transport,
            timeout,
        }
    }

    /// Content description
    pub fn content(&self) -> &F {
        &self.content
    }

    /// Content kind
    pub fn kind(&self) -> &'static str {
        self.content.kind()
    }

    /// Fetch the still-needed subset of `ids` from `peer`.
    ///
    /// Returns the items that passed verification, in arrival order.
    pub async fn fetch(
        &self,
        peer: &Peer,
        ids: Vec<H256>,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<F::Item>> {
        let wanted: Vec<H256> = ids.into_iter().filter(|id| self.content.is_needed(id)).collect();
        if wanted.is_empty() {
            return Ok(Vec::new());
        }
        let requested = wanted.len();
        let request = self.content.build_request(wanted);

        let mut replies = tokio::select! {
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            replies = self.transport.request(peer, request, self.timeout, Message::is_last_reply) => replies?,
        };

        let mut accepted = Vec::new();
        loop {
            let reply = tokio::select! {
                _ = cancel.cancelled() => return Err(SyncError::Cancelled),
                reply = replies.next() => reply,
            };
            let Some(reply) = reply else { break };
            let last = reply
                .as_ref()
                .map(Message::is_last_reply)
                .unwrap_or(true);
            for item in self.content.unpack(reply?)? {
                if self.content.verify(&item) {
                    accepted.push(item);
                } else {
                    trace!(kind = self.kind(), %peer, id = %self.content.id_of(&item).short(), "Dropped unverified item");
                }
            }
            if last {
                break;
            }
        }
        debug!(kind = self.kind(), %peer, requested, accepted = accepted.len(), "Fetch finished");
        Ok(accepted)
    }
}

/// Tracks peers with a fetch in flight.
#[derive(Clone, Default)]
pub struct FetchController {
    in_flight: Arc<DashSet<Address>>,
}

impl FetchController {
    /// Empty controller
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `peer`. Returns `None` while another fetch from it runs.
    pub fn try_acquire(&self, peer: &Peer) -> Option<FetchGuard> {
        if self.in_flight.insert(peer.address) {
            Some(FetchGuard {
                in_flight: Arc::clone(&self.in_flight),
                address: peer.address,
            })
        } else {
            None
        }
    }

    /// True while a fetch from `address` runs
    pub fn is_busy(&self, address: &Address) -> bool {
        self.in_flight.contains(address)
    }

    /// Number of peers with a fetch in flight
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Releases its peer when dropped
#[must_use = "the peer is released as soon as the guard is dropped"]
pub struct FetchGuard {
    in_flight: Arc<DashSet<Address>>,
    address: Address,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.address);
    }
}

fn unexpected(expected: &'static str, got: &Message) -> SyncError {
    SyncError::UnexpectedReply {
        expected,
        got: got.kind(),
    }
}

// ==================== Blocks ====================

/// Blocks with their commits. Nothing is staged; branches are appended
/// later in height order.
pub struct BlockFetcher {
    chain: Arc<dyn Blockchain>,
    chunk_size: u32,
}

impl BlockFetcher {
    /// Fetcher checking against `chain`
    pub fn new(chain: Arc<dyn Blockchain>, chunk_size: u32) -> Self {
        Self { chain, chunk_size }
    }
}

impl ContentFetcher for BlockFetcher {
    type Item = (Block, BlockCommit);

    fn kind(&self) -> &'static str {
        "block"
    }

    fn is_needed(&self, id: &H256) -> bool {
        !self.chain.contains_block(id)
    }

    fn verify(&self, (block, commit): &Self::Item) -> bool {
        commit.matches(block) && block.verify_roots() && !self.chain.contains_block(&block.hash())
    }

    fn id_of(&self, (block, _): &Self::Item) -> H256 {
        block.hash()
    }

    fn build_request(&self, ids: Vec<H256>) -> Message {
        Message::BlockRequest {
            block_hashes: ids,
            chunk_size: self.chunk_size.max(1),
        }
    }

    /// A reply whose blocks and commits do not pair up is rejected whole.
    fn unpack(&self, reply: Message) -> SyncResult<Vec<Self::Item>> {
        reply.validate()?;
        match reply {
            Message::BlockResponse { blocks, commits, .. } => {
                Ok(blocks.into_iter().zip(commits).collect())
            }
            other => Err(unexpected("block_response", &other)),
        }
    }
}

// ==================== Transactions ====================

/// Transactions, staged into the transaction pool on acceptance.
pub struct TxFetcher {
    chain: Arc<dyn Blockchain>,
    pool: Arc<dyn ContentPool<Transaction>>,
}

impl TxFetcher {
    /// Fetcher staging into `pool`
    pub fn new(chain: Arc<dyn Blockchain>, pool: Arc<dyn ContentPool<Transaction>>) -> Self {
        Self { chain, pool }
    }
}

impl ContentFetcher for TxFetcher {
    type Item = Transaction;

    fn kind(&self) -> &'static str {
        "tx"
    }

    fn is_needed(&self, id: &H256) -> bool {
        !self.pool.contains(id) && !self.chain.contains_transaction(id)
    }

    fn verify(&self, tx: &Transaction) -> bool {
        !self.chain.contains_transaction(&tx.id()) && self.pool.try_add(tx.clone())
    }

    fn id_of(&self, tx: &Transaction) -> H256 {
        tx.id()
    }

    fn build_request(&self, ids: Vec<H256>) -> Message {
        Message::TransactionRequest { tx_ids: ids }
    }

    fn unpack(&self, reply: Message) -> SyncResult<Vec<Transaction>> {
        match reply {
            Message::TransactionResponse { transactions, .. } => Ok(transactions),
            other => Err(unexpected("transaction_response", &other)),
        }
    }
}

// ==================== Evidence ====================

/// Evidence, staged into the pending-evidence pool on acceptance.
pub struct EvidenceFetcher {
    chain: Arc<dyn Blockchain>,
    pool: Arc<dyn ContentPool<Evidence>>,
}

impl EvidenceFetcher {
    /// Fetcher staging into `pool`
    pub fn new(chain: Arc<dyn Blockchain>, pool: Arc<dyn ContentPool<Evidence>>) -> Self {
        Self { chain, pool }
    }
}

impl ContentFetcher for EvidenceFetcher {
    type Item = Evidence;

    fn kind(&self) -> &'static str {
        "evidence"
    }

    fn is_needed(&self, id: &H256) -> bool {
        !self.pool.contains(id) && !self.chain.contains_evidence(id)
    }

    fn verify(&self, evidence: &Evidence) -> bool {
        !self.chain.contains_evidence(&evidence.id()) && self.pool.try_add(evidence.clone())
    }

    fn id_of(&self, evidence: &Evidence) -> H256 {
        evidence.id()
    }

    fn build_request(&self, ids: Vec<H256>) -> Message {
        Message::EvidenceRequest { evidence_ids: ids }
    }

    fn unpack(&self, reply: Message) -> SyncResult<Vec<Evidence>> {
        match reply {
            Message::EvidenceResponse { evidence, .. } => Ok(evidence),
            other => Err(unexpected("evidence_response", &other)),
        }
    }
}

// ==================== Consensus gossip ====================

/// Consensus payloads, staged into the gossip cache and handed to
/// observers on acceptance.
pub struct GossipFetcher {
    cache: Arc<dyn ContentPool<ConsensusPayload>>,
    received: Observers<ConsensusPayload>,
}

impl GossipFetcher {
    /// Fetcher staging into `cache` and notifying `received`
    pub fn new(cache: Arc<dyn ContentPool<ConsensusPayload>>, received: Observers<ConsensusPayload>) -> Self {
        Self { cache, received }
    }
}

impl ContentFetcher for GossipFetcher {
    type Item = ConsensusPayload;

    fn kind(&self) -> &'static str {
        "gossip"
    }

    fn is_needed(&self, id: &H256) -> bool {
        !self.cache.contains(id)
    }

    fn verify(&self, payload: &ConsensusPayload) -> bool {
        let added = self.cache.try_add(payload.clone());
        if added {
            self.received.emit(payload);
        }
        added
    }

    fn id_of(&self, payload: &ConsensusPayload) -> H256 {
        payload.id()
    }

    fn build_request(&self, ids: Vec<H256>) -> Message {
        Message::Want { ids }
    }

    fn unpack(&self, reply: Message) -> SyncResult<Vec<ConsensusPayload>> {
        match reply {
            Message::Wanted { payloads, .. } => Ok(payloads),
            other => Err(unexpected("wanted", &other)),
        }
    }
}
