//! Signed message envelope and protocol version

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use fugue_crypto::{address_of, recover_address, sign, PrivateKey, Signature};
use fugue_primitives::{Address, H256};
use fugue_types::{content_hash, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{NetworkError, NetworkResult};
use crate::message::Message;
use crate::peer::Peer;

/// Current unix time in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Application protocol version, signed by whoever issued it.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppProtocolVersion {
    /// Version number
    pub version: u32,
    /// Free-form data attached by the signer
    pub extra: Vec<u8>,
    /// Issuer
    pub signer: Address,
    /// Issuer's signature over (version, extra)
    pub signature: Signature,
}

impl AppProtocolVersion {
    fn signing_hash(version: u32, extra: &[u8]) -> H256 {
        content_hash(&(version, extra))
    }

    /// Issue a version signed by `key`.
    pub fn sign(key: &PrivateKey, version: u32, extra: Vec<u8>) -> NetworkResult<Self> {
        let signature = sign(&Self::signing_hash(version, &extra), key)
            .map_err(|e| NetworkError::InvalidSignature(e.to_string()))?;
        Ok(Self {
            version,
            extra,
            signer: address_of(key),
            signature,
        })
    }

    /// True if `signer` really signed this version.
    pub fn verify(&self) -> bool {
        let hash = Self::signing_hash(self.version, &self.extra);
        matches!(recover_address(&hash, &self.signature), Ok(addr) if addr == self.signer)
    }

    /// Canonical encoding, as handed out to node operators
    pub fn to_bytes(&self) -> NetworkResult<Vec<u8>> {
        encode(self).map_err(|e| NetworkError::Codec(e.to_string()))
    }

    /// Decode an issued version. The signature is not checked.
    pub fn from_bytes(bytes: &[u8]) -> NetworkResult<Self> {
        decode(bytes).map_err(|e| NetworkError::Codec(e.to_string()))
    }
}

impl fmt::Debug for AppProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppProtocolVersion(v{} by {})", self.version, self.signer)
    }
}

/// A message with its sender, protocol and correlation id.
///
/// The signature covers every other field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Correlation id: replies carry the request's identity
    pub identity: Uuid,
    /// Payload
    pub message: Message,
    /// Sender's protocol version
    pub protocol: AppProtocolVersion,
    /// Sender
    pub sender: Peer,
    /// Creation time (unix ms)
    pub timestamp: u64,
    /// Sender's signature
    pub signature: Signature,
}

#[derive(Serialize)]
struct UnsignedEnvelope<'a> {
    identity: &'a Uuid,
    message: &'a Message,
    protocol: &'a AppProtocolVersion,
    sender: &'a Peer,
    timestamp: u64,
}

impl MessageEnvelope {
    /// Sign `message` as `sender` at the current time.
    pub fn sign(
        key: &PrivateKey,
        identity: Uuid,
        message: Message,
        protocol: AppProtocolVersion,
        sender: Peer,
    ) -> NetworkResult<Self> {
        Self::sign_at(key, identity, message, protocol, sender, unix_millis())
    }

    /// Sign with an explicit timestamp.
    pub fn sign_at(
        key: &PrivateKey,
        identity: Uuid,
        message: Message,
        protocol: AppProtocolVersion,
        sender: Peer,
        timestamp: u64,
    ) -> NetworkResult<Self> {
        let hash = content_hash(&UnsignedEnvelope {
            identity: &identity,
            message: &message,
            protocol: &protocol,
            sender: &sender,
            timestamp,
        });
        let signature =
            sign(&hash, key).map_err(|e| NetworkError::InvalidSignature(e.to_string()))?;
        Ok(Self {
            identity,
            message,
            protocol,
            sender,
            timestamp,
            signature,
        })
    }

    fn signing_hash(&self) -> H256 {
        content_hash(&UnsignedEnvelope {
            identity: &self.identity,
            message: &self.message,
            protocol: &self.protocol,
            sender: &self.sender,
            timestamp: self.timestamp,
        })
    }

    /// Check the signature against `sender.address`.
    pub fn verify_signature(&self) -> NetworkResult<()> {
        let signer = recover_address(&self.signing_hash(), &self.signature)
            .map_err(|e| NetworkError::InvalidSignature(e.to_string()))?;
        if signer != self.sender.address {
            return Err(NetworkError::InvalidSignature(format!(
                "signed by {} but sent as {}",
                signer, self.sender.address
            )));
        }
        Ok(())
    }
}
