//! Signed transactions

use fugue_crypto::{address_of, recover_address, sign, CryptoError, PrivateKey, Signature};
use fugue_primitives::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::codec::content_hash;

/// Transaction identifier: hash of the full signed transaction
pub type TxId = H256;

/// A signed transaction. The payload is opaque to the sync layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender
    pub signer: Address,
    /// Sender nonce
    pub nonce: u64,
    /// Creation time (unix ms)
    pub timestamp: u64,
    /// Opaque action payload
    pub payload: Vec<u8>,
    /// Signature over the unsigned fields
    pub signature: Signature,
}

#[derive(Serialize)]
struct UnsignedTx<'a> {
    signer: &'a Address,
    nonce: u64,
    timestamp: u64,
    payload: &'a [u8],
}

impl Transaction {
    /// Build and sign a transaction.
    pub fn signed(
        key: &PrivateKey,
        nonce: u64,
        timestamp: u64,
        payload: Vec<u8>,
    ) -> Result<Self, CryptoError> {
        let signer = address_of(key);
        let hash = Self::signing_hash(&signer, nonce, timestamp, &payload);
        let signature = sign(&hash, key)?;
        Ok(Self {
            signer,
            nonce,
            timestamp,
            payload,
            signature,
        })
    }

    fn signing_hash(signer: &Address, nonce: u64, timestamp: u64, payload: &[u8]) -> H256 {
        content_hash(&UnsignedTx {
            signer,
            nonce,
            timestamp,
            payload,
        })
    }

    /// Content id
    pub fn id(&self) -> TxId {
        content_hash(self)
    }

    /// True if `signature` was produced by `signer`.
    pub fn verify_signature(&self) -> bool {
        let hash = Self::signing_hash(&self.signer, self.nonce, self.timestamp, &self.payload);
        matches!(recover_address(&hash, &self.signature), Ok(addr) if addr == self.signer)
    }
}
