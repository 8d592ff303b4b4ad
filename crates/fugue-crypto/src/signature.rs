//! ECDSA signature operations using secp256k1

use fugue_primitives::{Address, H256};
use k256::ecdsa::{RecoveryId, Signature as K256Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use crate::{keccak256, CryptoError};

/// Recoverable ECDSA signature, always in low-s form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    /// r component (32 bytes)
    pub r: [u8; 32],
    /// s component (32 bytes)
    pub s: [u8; 32],
    /// recovery id (0 or 1)
    pub v: u8,
}

/// Public key
pub type PublicKey = VerifyingKey;

/// Private key (32 bytes)
pub type PrivateKey = SigningKey;

impl Signature {
    /// Create signature from r, s, v components
    pub fn new(r: [u8; 32], s: [u8; 32], v: u8) -> Self {
        Signature { r, s, v }
    }

    /// Convert to 65-byte representation (r || s || v)
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut bytes = [0u8; 65];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..64].copy_from_slice(&self.s);
        bytes[64] = self.v;
        bytes
    }

    fn to_k256(&self) -> Result<K256Signature, CryptoError> {
        let r: k256::FieldBytes = self.r.into();
        let s: k256::FieldBytes = self.s.into();
        K256Signature::from_scalars(r, s).map_err(|e| CryptoError::InvalidSignature(e.to_string()))
    }
}

/// Sign a 32-byte digest. The result is normalized to low-s.
pub fn sign(message_hash: &H256, private_key: &PrivateKey) -> Result<Signature, CryptoError> {
    let (mut signature, mut recovery_id) = private_key
        .sign_prehash_recoverable(message_hash.as_bytes())
        .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;

    // s -> n - s flips the parity of R.y
    if let Some(normalized) = signature.normalize_s() {
        signature = normalized;
        recovery_id = RecoveryId::new(!recovery_id.is_y_odd(), recovery_id.is_x_reduced());
    }

    let bytes = signature.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);

    Ok(Signature::new(r, s, recovery_id.to_byte()))
}

/// Verify a signature against a message hash and public key.
///
/// High-s signatures are rejected.
pub fn verify(
    message_hash: &H256,
    signature: &Signature,
    public_key: &PublicKey,
) -> Result<bool, CryptoError> {
    let k256_sig = signature.to_k256()?;
    if k256_sig.normalize_s().is_some() {
        return Ok(false);
    }

    use k256::ecdsa::signature::hazmat::PrehashVerifier;
    Ok(public_key
        .verify_prehash(message_hash.as_bytes(), &k256_sig)
        .is_ok())
}

/// Recover public key from signature and message hash
pub fn recover_public_key(
    message_hash: &H256,
    signature: &Signature,
) -> Result<PublicKey, CryptoError> {
    let k256_sig = signature.to_k256()?;
    let recovery_id = RecoveryId::from_byte(signature.v)
        .ok_or(CryptoError::InvalidRecoveryId(signature.v))?;

    VerifyingKey::recover_from_prehash(message_hash.as_bytes(), &k256_sig, recovery_id)
        .map_err(|e| CryptoError::RecoveryFailed(e.to_string()))
}

/// Recover the address that produced `signature` over `message_hash`.
pub fn recover_address(message_hash: &H256, signature: &Signature) -> Result<Address, CryptoError> {
    recover_public_key(message_hash, signature).map(|pk| public_key_to_address(&pk))
}

/// Derive an address from a public key: last 20 bytes of keccak256(x || y).
pub fn public_key_to_address(public_key: &PublicKey) -> Address {
    let encoded = public_key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);

    let mut addr_bytes = [0u8; 20];
    addr_bytes.copy_from_slice(&hash.as_bytes()[12..]);
    Address::from_bytes(addr_bytes)
}

/// Address controlled by `private_key`.
pub fn address_of(private_key: &PrivateKey) -> Address {
    public_key_to_address(private_key.verifying_key())
}

/// Fresh key from the OS random source.
pub fn random_private_key() -> PrivateKey {
    SigningKey::random(&mut rand::rngs::OsRng)
}

/// Parse a 32-byte secret scalar.
pub fn private_key_from_bytes(bytes: &[u8]) -> Result<PrivateKey, CryptoError> {
    SigningKey::from_slice(bytes).map_err(|_| CryptoError::InvalidPrivateKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = random_private_key();
        let hash = keccak256(b"test message");
        let signature = sign(&hash, &key).unwrap();
        assert!(verify(&hash, &signature, key.verifying_key()).unwrap());
    }

    #[test]
    fn test_verify_wrong_message() {
        let key = random_private_key();
        let signature = sign(&keccak256(b"one"), &key).unwrap();
        assert!(!verify(&keccak256(b"two"), &signature, key.verifying_key()).unwrap());
    }

    #[test]
    fn test_recover_address_matches_signer() {
        let key = random_private_key();
        let hash = keccak256(b"envelope");
        let signature = sign(&hash, &key).unwrap();
        assert_eq!(recover_address(&hash, &signature).unwrap(), address_of(&key));
    }

    #[test]
    fn test_recover_address_other_message_differs() {
        let key = random_private_key();
        let signature = sign(&keccak256(b"a"), &key).unwrap();
        let recovered = recover_address(&keccak256(b"b"), &signature);
        // Either recovery fails or yields a different key
        if let Ok(addr) = recovered {
            assert_ne!(addr, address_of(&key));
        }
    }

    #[test]
    fn test_invalid_recovery_id() {
        let key = random_private_key();
        let hash = keccak256(b"x");
        let mut signature = sign(&hash, &key).unwrap();
        signature.v = 9;
        assert!(matches!(
            recover_public_key(&hash, &signature),
            Err(CryptoError::InvalidRecoveryId(9))
        ));
    }

    #[test]
    fn test_zero_signature_rejected() {
        let signature = Signature::new([0u8; 32], [0u8; 32], 0);
        assert!(recover_address(&keccak256(b"x"), &signature).is_err());
    }

    #[test]
    fn test_signatures_are_low_s() {
        let key = random_private_key();
        for i in 0..16u8 {
            let hash = keccak256(&[i]);
            let signature = sign(&hash, &key).unwrap();
            assert!(signature.to_k256().unwrap().normalize_s().is_none());
        }
    }

    #[test]
    fn test_known_private_key_address() {
        // Private key 1 -> well known address
        let mut bytes = [0u8; 32];
        bytes[31] = 1;
        let key = private_key_from_bytes(&bytes).unwrap();
        assert_eq!(
            address_of(&key).to_hex(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_private_key_from_bytes_rejects_zero() {
        assert!(matches!(
            private_key_from_bytes(&[0u8; 32]),
            Err(CryptoError::InvalidPrivateKey)
        ));
    }

    #[test]
    fn test_signature_to_bytes_layout() {
        let signature = Signature::new([1u8; 32], [2u8; 32], 1);
        let bytes = signature.to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(bytes[32], 2);
        assert_eq!(bytes[64], 1);
    }
}
