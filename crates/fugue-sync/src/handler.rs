//! Inbound message handling

use std::sync::Arc;

use async_trait::async_trait;
use fugue_network::{Message, MessageEnvelope, MessageHandler, NetworkError, NetworkResult};
use fugue_types::ContentPool;
use tracing::debug;

use crate::synchronizer::Synchronizer;

/// Answers requests from the local chain and pools, and turns
/// advertisements into demands.
pub struct SyncHandler {
    sync: Arc<Synchronizer>,
}

impl SyncHandler {
    /// Handler backed by `sync`
    pub fn new(sync: Arc<Synchronizer>) -> Self {
        Self { sync }
    }

    fn answer(&self, envelope: MessageEnvelope) -> NetworkResult<Vec<Message>> {
        let sync = &self.sync;
        let chain = sync.chain();
        let sender = envelope.sender;
        let chunk = sync.config().chunk_len();

        let replies = match envelope.message {
            Message::GetChainStatus => vec![Message::ChainStatus {
                genesis_hash: chain.genesis_hash(),
                tip: chain.tip(),
            }],
            Message::GetBlockHashes { locator } => vec![Message::BlockHashes {
                hashes: chain.find_next_hashes(&locator, sync.config().block_hash_limit),
            }],
            Message::BlockRequest {
                block_hashes,
                chunk_size,
            } => {
                let pairs: Vec<_> = block_hashes
                    .iter()
                    .take(sync.config().block_hash_limit)
                    .filter_map(|hash| Some((chain.block(hash)?, chain.block_commit(hash)?)))
                    .collect();
                chunked(pairs, chunk_size as usize, |pairs, is_last| {
                    let (blocks, commits) = pairs.into_iter().unzip();
                    Message::BlockResponse {
                        blocks,
                        commits,
                        is_last,
                    }
                })
            }
            Message::TransactionRequest { tx_ids } => {
                let found = tx_ids
                    .iter()
                    .filter_map(|id| sync.transactions().get(id))
                    .collect();
                chunked(found, chunk, |transactions, is_last| {
                    Message::TransactionResponse {
                        transactions,
                        is_last,
                    }
                })
            }
            Message::EvidenceRequest { evidence_ids } => {
                let found = evidence_ids
                    .iter()
                    .filter_map(|id| sync.evidence().get(id))
                    .collect();
                chunked(found, chunk, |evidence, is_last| Message::EvidenceResponse {
                    evidence,
                    is_last,
                })
            }
            Message::Want { ids } => {
                chunked(sync.gossip().payloads(&ids), chunk, |payloads, is_last| {
                    Message::Wanted { payloads, is_last }
                })
            }
            Message::BlockSummary {
                genesis_hash,
                summary,
            } => {
                if let Err(e) = sync.block_sync().demand_tip(sender, genesis_hash, summary) {
                    debug!(peer = %sender, error = %e, "Ignoring advertised tip");
                }
                Vec::new()
            }
            Message::TxIds { ids } => {
                sync.tx_sync().demand(sender, ids);
                Vec::new()
            }
            Message::EvidenceIds { ids } => {
                sync.evidence_sync().demand(sender, ids);
                Vec::new()
            }
            Message::Have { ids } => {
                sync.gossip().demand(sender, ids);
                Vec::new()
            }
            Message::Consensus { payload } => {
                sync.gossip().receive(&sender, payload);
                Vec::new()
            }
            other => {
                return Err(NetworkError::InvalidMessage(format!(
                    "unsolicited {} from {}",
                    other.kind(),
                    sender
                )))
            }
        };
        Ok(replies)
    }
}

#[async_trait]
impl MessageHandler for SyncHandler {
    async fn handle(&self, envelope: MessageEnvelope) -> NetworkResult<Vec<Message>> {
        if let Some(reply) = self.sync.explorer().respond(&envelope) {
            return Ok(vec![reply]);
        }
        self.answer(envelope)
    }
}

/// Split `items` into replies of at most `size`, flagging the last one.
/// Nothing found still yields one empty last reply.
fn chunked<T>(items: Vec<T>, size: usize, wrap: impl Fn(Vec<T>, bool) -> Message) -> Vec<Message> {
    if items.is_empty() {
        return vec![wrap(Vec::new(), true)];
    }
    let size = size.max(1);
    let count = items.len().div_ceil(size);
    let mut items = items.into_iter();
    (0..count)
        .map(|i| wrap(items.by_ref().take(size).collect(), i + 1 == count))
        .collect()
}
