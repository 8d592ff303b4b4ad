//! Cryptographic errors

use thiserror::Error;

/// Cryptographic operation error
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Signing failed
    #[error("signing failed: {0}")]
    SigningFailed(String),

    /// Malformed signature bytes
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    /// Recovery id outside 0..=3
    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),

    /// Recovery failed
    #[error("public key recovery failed: {0}")]
    RecoveryFailed(String),

    /// Key bytes are not a valid secp256k1 scalar
    #[error("invalid private key")]
    InvalidPrivateKey,
}
