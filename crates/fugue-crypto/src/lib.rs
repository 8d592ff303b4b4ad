//! # fugue-crypto
//!
//! Cryptographic primitives for Fugue.
//!
//! - Keccak-256 hashing (content ids, block hashes)
//! - ECDSA signing/verification over secp256k1
//! - Signer recovery and address derivation
//!
//! Envelope and protocol-version signatures are checked by recovering the
//! signer's [`Address`](fugue_primitives::Address) and comparing it with the
//! claimed one, so no public key ever travels on the wire.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod hash;
mod signature;
mod error;

pub use hash::keccak256;
pub use signature::{
    sign, verify, recover_public_key, recover_address, public_key_to_address,
    address_of, random_private_key, private_key_from_bytes,
    Signature, PublicKey, PrivateKey,
};
pub use error::CryptoError;
