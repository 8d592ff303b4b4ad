use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fugue_crypto::{address_of, PrivateKey};
use fugue_primitives::Address;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tracing::debug;
use uuid::Uuid;

use super::{Inbox, IsLast, ReplyStream, Transport};
use crate::envelope::{AppProtocolVersion, MessageEnvelope};
use crate::error::{NetworkError, NetworkResult};
use crate::message::Message;
use crate::peer::Peer;
use crate::validation::{MessageValidator, ValidatorConfig};

/// Signing identity of one node
struct Identity {
    key: PrivateKey,
    peer: Peer,
    protocol: AppProtocolVersion,
}

impl Identity {
    fn envelope(&self, identity: Uuid, message: Message) -> NetworkResult<MessageEnvelope> {
        MessageEnvelope::sign(&self.key, identity, message, self.protocol.clone(), self.peer)
    }
}

#[derive(Clone)]
struct Attached {
    inbox: Inbox,
    identity: Arc<Identity>,
}

struct NetworkInner {
    nodes: RwLock<HashMap<Address, Attached>>,
    next_port: AtomicU16,
}

/// In-process network. Nodes that are not attached behave like hosts that
/// never answer.
///
/// Replies are signed by the responder and validated by the requester, as
/// over TCP.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    /// Empty network
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                nodes: RwLock::new(HashMap::new()),
                next_port: AtomicU16::new(20_000),
            }),
        }
    }

    /// Create a transport for a new node. It receives nothing until
    /// [`MemoryTransport::attach`] is called.
    pub fn join(&self, key: PrivateKey, protocol: AppProtocolVersion) -> Arc<MemoryTransport> {
        let port = self.inner.next_port.fetch_add(1, Ordering::Relaxed);
        let endpoint = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let peer = Peer::new(address_of(&key), endpoint);
        Arc::new(MemoryTransport {
            network: self.clone(),
            identity: Arc::new(Identity { key, peer, protocol }),
        })
    }

    fn node(&self, address: &Address) -> Option<Attached> {
        self.inner.nodes.read().get(address).cloned()
    }

    /// Number of attached nodes
    pub fn len(&self) -> usize {
        self.inner.nodes.read().len()
    }

    /// True if no node is attached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's view of a [`MemoryNetwork`]
pub struct MemoryTransport {
    network: MemoryNetwork,
    identity: Arc<Identity>,
}

impl MemoryTransport {
    /// Start receiving through `inbox`. Its validator also checks the
    /// replies this node gets back.
    pub fn attach(&self, inbox: Inbox) {
        let attached = Attached {
            inbox,
            identity: Arc::clone(&self.identity),
        };
        self.network.inner.nodes.write().insert(self.identity.peer.address, attached);
    }

    /// Stop receiving; requests to this node time out
    pub fn detach(&self) {
        self.network.inner.nodes.write().remove(&self.identity.peer.address);
    }

    /// Validator for replies: the attached inbox's, or one accepting only
    /// our own protocol while detached.
    fn reply_validator(&self) -> Arc<MessageValidator> {
        match self.network.node(&self.identity.peer.address) {
            Some(attached) => Arc::clone(attached.inbox.validator()),
            None => Arc::new(MessageValidator::new(
                self.identity.protocol.clone(),
                ValidatorConfig::default(),
            )),
        }
    }
}

/// Sign `replies` as the responder and pass those the requester accepts.
async fn deliver_replies(
    tx: &mpsc::Sender<NetworkResult<Message>>,
    replies: Vec<Message>,
    responder: &Identity,
    identity: Uuid,
    validator: &MessageValidator,
    is_last: IsLast,
) {
    for reply in replies {
        let checked = responder
            .envelope(identity, reply)
            .and_then(|frame| validator.validate(&frame).map(|()| frame.message));
        let message = match checked {
            Ok(message) => message,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };
        let done = is_last(&message);
        if tx.send(Ok(message)).await.is_err() || done {
            return;
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_peer(&self) -> Peer {
        self.identity.peer
    }

    async fn request(
        &self,
        peer: &Peer,
        message: Message,
        timeout: Duration,
        is_last: IsLast,
    ) -> NetworkResult<ReplyStream> {
        let remote = self
            .network
            .node(&peer.address)
            .ok_or_else(|| NetworkError::Timeout(format!("{} did not answer", peer)))?;
        let identity = Uuid::new_v4();
        let envelope = self.identity.envelope(identity, message)?;
        let validator = self.reply_validator();
        let deadline = Instant::now() + timeout;
        let (tx, stream) = ReplyStream::channel(16);
        let target = *peer;

        tokio::spawn(async move {
            match timeout_at(deadline, remote.inbox.receive(envelope)).await {
                Ok(Ok(replies)) => {
                    let delivery = deliver_replies(
                        &tx,
                        replies,
                        &remote.identity,
                        identity,
                        &validator,
                        is_last,
                    );
                    if timeout_at(deadline, delivery).await.is_err() {
                        let _ = tx
                            .send(Err(NetworkError::Timeout(format!("reply from {}", target))))
                            .await;
                    }
                }
                Ok(Err(e)) => {
                    let _ = tx.send(Err(e)).await;
                }
                Err(_) => {
                    let _ = tx
                        .send(Err(NetworkError::Timeout(format!("request to {} timed out", target))))
                        .await;
                }
            }
        });
        Ok(stream)
    }

    fn post(&self, peers: &[Peer], message: Message) {
        for peer in peers {
            let Some(remote) = self.network.node(&peer.address) else {
                debug!(%peer, kind = message.kind(), "Dropping post to unreachable peer");
                continue;
            };
            let envelope = match self.identity.envelope(Uuid::new_v4(), message.clone()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    debug!(error = %e, "Failed to sign envelope");
                    return;
                }
            };
            let target = *peer;
            tokio::spawn(async move {
                if let Err(e) = remote.inbox.receive(envelope).await {
                    debug!(peer = %target, error = %e, "Posted message rejected");
                }
            });
        }
    }
}
