//! Fixtures shared by the unit tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fugue_network::{Message, NetworkResult, Peer, ReplyStream, Transport};
use fugue_primitives::Address;
use fugue_types::{Block, BlockCommit, Blockchain, MemoryChain};
use parking_lot::Mutex;

pub fn proposer() -> Address {
    Address::from_bytes([0xaa; 20])
}

/// Genesis plus `n` empty blocks
pub fn build_blocks(n: u64) -> Vec<Block> {
    let mut blocks = vec![Block::genesis(proposer(), 0)];
    for i in 1..=n {
        let next = Block::next(&blocks[blocks.len() - 1], proposer(), i * 1000, vec![], vec![]);
        blocks.push(next);
    }
    blocks
}

/// Chain holding `blocks` (genesis first)
pub fn chain_from(blocks: &[Block]) -> Arc<MemoryChain> {
    let chain = MemoryChain::new(blocks[0].clone());
    for block in &blocks[1..] {
        chain
            .append(block.clone(), BlockCommit::for_block(block))
            .unwrap();
    }
    Arc::new(chain)
}

/// Chain of genesis plus `n` blocks, with the blocks
pub fn chain_of(n: u64) -> (Arc<MemoryChain>, Vec<Block>) {
    let blocks = build_blocks(n);
    (chain_from(&blocks), blocks)
}

type Responder = Box<dyn Fn(&Message) -> Vec<Message> + Send + Sync>;

/// Transport answering requests from a script and recording them
pub struct ScriptedTransport {
    local: Peer,
    remote: Peer,
    responder: Responder,
    requests: Mutex<Vec<Message>>,
}

impl ScriptedTransport {
    /// Every request gets `replies`
    pub fn new(replies: Vec<Message>) -> Arc<Self> {
        Self::responding(move |_| replies.clone())
    }

    /// Replies computed per request
    pub fn responding<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&Message) -> Vec<Message> + Send + Sync + 'static,
    {
        Arc::new(Self {
            local: Peer::new(Address::from_bytes([1; 20]), "127.0.0.1:1".parse().unwrap()),
            remote: Peer::new(Address::from_bytes([2; 20]), "127.0.0.1:2".parse().unwrap()),
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn remote(&self) -> Peer {
        self.remote
    }

    pub fn requests(&self) -> Vec<Message> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn local_peer(&self) -> Peer {
        self.local
    }

    async fn request(
        &self,
        _peer: &Peer,
        message: Message,
        _timeout: Duration,
        _is_last: fugue_network::transport::IsLast,
    ) -> NetworkResult<ReplyStream> {
        let replies = (self.responder)(&message);
        self.requests.lock().push(message);
        Ok(ReplyStream::from_replies(replies))
    }

    fn post(&self, _peers: &[Peer], _message: Message) {}
}
