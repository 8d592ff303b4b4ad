//! Canonical binary encoding.
//!
//! bincode with its default fixed-int little-endian configuration is the one
//! encoding used on the wire and for content ids.

use fugue_crypto::keccak256;
use fugue_primitives::H256;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{ChainError, ChainResult};

/// Encode a value to its canonical bytes.
pub fn encode<T: Serialize>(value: &T) -> ChainResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| ChainError::Codec(e.to_string()))
}

/// Decode a value from canonical bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> ChainResult<T> {
    bincode::deserialize(bytes).map_err(|e| ChainError::Codec(e.to_string()))
}

/// Keccak-256 of the canonical encoding.
pub fn content_hash<T: Serialize>(value: &T) -> H256 {
    // bincode only fails on unsized sequences and non-serializable maps,
    // neither of which appear in these types.
    let bytes = bincode::serialize(value).unwrap_or_default();
    keccak256(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        height: u64,
        tag: String,
        ids: Vec<H256>,
    }

    fn sample() -> Sample {
        Sample {
            height: 7,
            tag: "fugue".into(),
            ids: vec![H256::from_bytes([3u8; 32])],
        }
    }

    #[test]
    fn test_encode_decode() {
        let bytes = encode(&sample()).unwrap();
        let back: Sample = decode(&bytes).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: ChainResult<Sample> = decode(&[0xff, 0x01]);
        assert!(matches!(result, Err(ChainError::Codec(_))));
    }

    #[test]
    fn test_content_hash_is_deterministic() {
        assert_eq!(content_hash(&sample()), content_hash(&sample()));

        let mut other = sample();
        other.height = 8;
        assert_ne!(content_hash(&sample()), content_hash(&other));
    }

    #[test]
    fn test_fixed_width_integers() {
        // u64 is always 8 bytes regardless of value
        assert_eq!(encode(&1u64).unwrap().len(), 8);
        assert_eq!(encode(&u64::MAX).unwrap().len(), 8);
    }
}
