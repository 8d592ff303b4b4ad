use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fugue_crypto::{address_of, PrivateKey};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Inbox, IsLast, ReplyStream, Transport};
use crate::codec::EnvelopeCodec;
use crate::envelope::{AppProtocolVersion, MessageEnvelope};
use crate::error::{NetworkError, NetworkResult};
use crate::message::Message;
use crate::peer::Peer;
use crate::validation::MessageValidator;

/// Time an inbound connection gets to deliver its request
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP transport: one connection per request.
///
/// The requester writes one envelope; the responder writes its replies,
/// each signed and carrying the request's identity, then closes.
pub struct TcpTransport {
    key: PrivateKey,
    peer: Peer,
    protocol: AppProtocolVersion,
    validator: Arc<MessageValidator>,
}

impl TcpTransport {
    /// Transport announcing itself at `public_endpoint`
    pub fn new(
        key: PrivateKey,
        public_endpoint: SocketAddr,
        protocol: AppProtocolVersion,
        validator: Arc<MessageValidator>,
    ) -> Self {
        let peer = Peer::new(address_of(&key), public_endpoint);
        Self {
            key,
            peer,
            protocol,
            validator,
        }
    }

    fn envelope(&self, identity: Uuid, message: Message) -> NetworkResult<MessageEnvelope> {
        MessageEnvelope::sign(&self.key, identity, message, self.protocol.clone(), self.peer)
    }

    /// Accept connections until `cancel` fires.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, inbox: Inbox, cancel: CancellationToken) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, peer = %self.peer, "P2P listener started");
        }
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let this = Arc::clone(&self);
                        let inbox = inbox.clone();
                        tokio::spawn(async move {
                            if let Err(e) = this.handle_connection(stream, inbox).await {
                                debug!(%remote, error = %e, "Inbound exchange failed");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                }
            }
        }
        info!("P2P listener stopped");
    }

    async fn handle_connection(&self, stream: TcpStream, inbox: Inbox) -> NetworkResult<()> {
        let mut framed = Framed::new(stream, EnvelopeCodec::new());
        let request = match timeout(READ_TIMEOUT, framed.next()).await {
            Ok(Some(frame)) => frame?,
            Ok(None) => return Ok(()),
            Err(_) => return Err(NetworkError::Timeout("inbound request".into())),
        };
        let identity = request.identity;
        for reply in inbox.receive(request).await? {
            framed.send(self.envelope(identity, reply)?).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_peer(&self) -> Peer {
        self.peer
    }

    async fn request(
        &self,
        peer: &Peer,
        message: Message,
        request_timeout: Duration,
        is_last: IsLast,
    ) -> NetworkResult<ReplyStream> {
        let deadline = Instant::now() + request_timeout;
        let stream = timeout_at(deadline, TcpStream::connect(peer.endpoint))
            .await
            .map_err(|_| NetworkError::Timeout(format!("connect to {}", peer)))?
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", peer, e)))?;

        let identity = Uuid::new_v4();
        let mut framed = Framed::new(stream, EnvelopeCodec::new());
        timeout_at(deadline, framed.send(self.envelope(identity, message)?))
            .await
            .map_err(|_| NetworkError::Timeout(format!("send to {}", peer)))??;

        let (tx, replies) = ReplyStream::channel(16);
        let validator = Arc::clone(&self.validator);
        let target = *peer;
        tokio::spawn(async move {
            loop {
                let frame = match timeout_at(deadline, framed.next()).await {
                    Err(_) => {
                        let _ = tx
                            .send(Err(NetworkError::Timeout(format!("reply from {}", target))))
                            .await;
                        break;
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        let _ = tx.send(Err(e)).await;
                        break;
                    }
                    Ok(Some(Ok(frame))) => frame,
                };
                if frame.identity != identity || frame.sender.address != target.address {
                    let _ = tx
                        .send(Err(NetworkError::InvalidMessage(format!(
                            "unexpected reply from {}",
                            frame.sender
                        ))))
                        .await;
                    break;
                }
                if let Err(e) = validator.validate(&frame) {
                    let _ = tx.send(Err(e)).await;
                    break;
                }
                let done = is_last(&frame.message);
                if tx.send(Ok(frame.message)).await.is_err() || done {
                    break;
                }
            }
        });
        Ok(replies)
    }

    fn post(&self, peers: &[Peer], message: Message) {
        let kind = message.kind();
        let envelope = match self.envelope(Uuid::new_v4(), message) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(kind, error = %e, "Failed to sign envelope");
                return;
            }
        };
        for peer in peers {
            let target = *peer;
            let envelope = envelope.clone();
            tokio::spawn(async move {
                let result = async {
                    let stream = timeout(READ_TIMEOUT, TcpStream::connect(target.endpoint))
                        .await
                        .map_err(|_| NetworkError::Timeout(format!("connect to {}", target)))??;
                    let mut framed = Framed::new(stream, EnvelopeCodec::new());
                    framed.send(envelope).await?;
                    framed.close().await
                }
                .await;
                if let Err(e) = result {
                    debug!(peer = %target, kind, error = %e, "Post failed");
                }
            });
        }
    }
}
