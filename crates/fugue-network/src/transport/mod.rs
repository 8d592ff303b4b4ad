//! Transport abstraction.
//!
//! A [`Transport`] sends requests and streams back replies; the receiving
//! side hands every validated envelope to a [`MessageHandler`] through an
//! [`Inbox`]. Two implementations exist: an in-process network for tests and
//! simulations, and TCP.

mod memory;
mod tcp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fugue_primitives::{Address, H256};
use fugue_types::BlockSummary;
use tokio::sync::mpsc;

use crate::envelope::MessageEnvelope;
use crate::error::{NetworkError, NetworkResult};
use crate::message::Message;
use crate::peer::Peer;
use crate::validation::MessageValidator;

/// Decides whether a reply closes its stream
pub type IsLast = fn(&Message) -> bool;

/// Replies to one request, in arrival order.
#[derive(Debug)]
pub struct ReplyStream {
    rx: mpsc::Receiver<NetworkResult<Message>>,
}

impl ReplyStream {
    /// Stream fed through the returned sender
    pub fn channel(capacity: usize) -> (mpsc::Sender<NetworkResult<Message>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// Stream over already available replies
    pub fn from_replies(replies: Vec<Message>) -> Self {
        let (tx, stream) = Self::channel(replies.len());
        for reply in replies {
            // capacity covers every reply
            let _ = tx.try_send(Ok(reply));
        }
        stream
    }

    /// Next reply, or `None` once the stream is complete
    pub async fn next(&mut self) -> Option<NetworkResult<Message>> {
        self.rx.recv().await
    }

    /// Drain the stream, failing on the first error
    pub async fn collect(mut self) -> NetworkResult<Vec<Message>> {
        let mut out = Vec::new();
        while let Some(reply) = self.next().await {
            out.push(reply?);
        }
        Ok(out)
    }
}

/// Sending side of the peer-to-peer network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// This node as others see it
    fn local_peer(&self) -> Peer;

    /// Send `message` and stream the replies until one satisfies `is_last`.
    ///
    /// `timeout` bounds the whole exchange.
    async fn request(
        &self,
        peer: &Peer,
        message: Message,
        timeout: Duration,
        is_last: IsLast,
    ) -> NetworkResult<ReplyStream>;

    /// Fire-and-forget delivery to each peer
    fn post(&self, peers: &[Peer], message: Message);

    /// Request with exactly one reply
    async fn request_one(
        &self,
        peer: &Peer,
        message: Message,
        timeout: Duration,
    ) -> NetworkResult<Message> {
        let kind = message.kind();
        let mut stream = self.request(peer, message, timeout, |_| true).await?;
        match stream.next().await {
            Some(reply) => reply,
            None => Err(NetworkError::Timeout(format!("no reply to {} from {}", kind, peer))),
        }
    }

    /// Liveness probe, returning the round trip
    async fn ping(&self, peer: &Peer, timeout: Duration) -> NetworkResult<Duration> {
        let start = Instant::now();
        match self.request_one(peer, Message::Ping, timeout).await? {
            Message::Pong => Ok(start.elapsed()),
            other => Err(NetworkError::InvalidMessage(format!(
                "expected pong, got {}",
                other.kind()
            ))),
        }
    }

    /// Peers `peer` knows nearest to `target`
    async fn find_neighbors(
        &self,
        peer: &Peer,
        target: Address,
        timeout: Duration,
    ) -> NetworkResult<Vec<Peer>> {
        match self
            .request_one(peer, Message::FindNeighbors { target }, timeout)
            .await?
        {
            Message::Neighbors { found } => Ok(found),
            other => Err(NetworkError::InvalidMessage(format!(
                "expected neighbors, got {}",
                other.kind()
            ))),
        }
    }

    /// Hashes `peer` has after the first locator entry it knows
    async fn get_block_hashes(
        &self,
        peer: &Peer,
        locator: Vec<H256>,
        timeout: Duration,
    ) -> NetworkResult<Vec<H256>> {
        match self
            .request_one(peer, Message::GetBlockHashes { locator }, timeout)
            .await?
        {
            Message::BlockHashes { hashes } => Ok(hashes),
            other => Err(NetworkError::InvalidMessage(format!(
                "expected block hashes, got {}",
                other.kind()
            ))),
        }
    }

    /// Genesis hash and tip of `peer`
    async fn get_chain_status(
        &self,
        peer: &Peer,
        timeout: Duration,
    ) -> NetworkResult<(H256, BlockSummary)> {
        match self.request_one(peer, Message::GetChainStatus, timeout).await? {
            Message::ChainStatus { genesis_hash, tip } => Ok((genesis_hash, tip)),
            other => Err(NetworkError::InvalidMessage(format!(
                "expected chain status, got {}",
                other.kind()
            ))),
        }
    }
}

/// Receiving side: answers validated envelopes.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Replies to send back, in order. Empty for one-way messages.
    async fn handle(&self, envelope: MessageEnvelope) -> NetworkResult<Vec<Message>>;
}

/// Validator plus handler; every transport delivers inbound envelopes here.
#[derive(Clone)]
pub struct Inbox {
    validator: Arc<MessageValidator>,
    handler: Arc<dyn MessageHandler>,
}

impl Inbox {
    /// Create an inbox
    pub fn new(validator: Arc<MessageValidator>, handler: Arc<dyn MessageHandler>) -> Self {
        Self { validator, handler }
    }

    /// Validator applied to inbound envelopes
    pub fn validator(&self) -> &Arc<MessageValidator> {
        &self.validator
    }

    /// Validate, then handle.
    pub async fn receive(&self, envelope: MessageEnvelope) -> NetworkResult<Vec<Message>> {
        self.validator.validate(&envelope)?;
        self.handler.handle(envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reply_stream_from_replies() {
        let stream = ReplyStream::from_replies(vec![Message::Pong, Message::Ping]);
        let replies = stream.collect().await.unwrap();
        assert_eq!(replies, vec![Message::Pong, Message::Ping]);
    }

    #[tokio::test]
    async fn test_reply_stream_error_stops_collect() {
        let (tx, stream) = ReplyStream::channel(4);
        tx.send(Ok(Message::Pong)).await.unwrap();
        tx.send(Err(NetworkError::Timeout("late".into()))).await.unwrap();
        drop(tx);
        assert!(matches!(stream.collect().await, Err(NetworkError::Timeout(_))));
    }
}
