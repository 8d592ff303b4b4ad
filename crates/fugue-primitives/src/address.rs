//! 20-byte node and account address with Kademlia distance helpers

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Address parsing error
#[derive(Debug, Error)]
pub enum AddressError {
    /// Invalid hex string
    #[error("invalid hex string: {0}")]
    InvalidHex(String),
    /// Invalid length
    #[error("invalid address length: expected 20 bytes, got {0}")]
    InvalidLength(usize),
}

/// 20-byte address shared by peers and content owners.
///
/// Ordering is the big-endian byte order, which makes `a.xor_distance(t)`
/// comparisons equivalent to comparing XOR distances as integers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Address([u8; 20]);

impl Address {
    /// Size of address in bytes
    pub const LEN: usize = 20;

    /// Number of bits in an address
    pub const BITS: usize = Self::LEN * 8;

    /// Zero address (0x0000...0000)
    pub const ZERO: Address = Address([0u8; 20]);

    /// Create address from bytes
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    /// Create address from slice
    pub fn from_slice(slice: &[u8]) -> Result<Self, AddressError> {
        if slice.len() != Self::LEN {
            return Err(AddressError::InvalidLength(slice.len()));
        }
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(slice);
        Ok(Address(bytes))
    }

    /// Parse address from hex string (with or without 0x prefix)
    pub fn from_hex(s: &str) -> Result<Self, AddressError> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Random address, mostly useful for lookups and tests
    pub fn random() -> Self {
        Address(rand::random())
    }

    /// Get as byte slice
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Check if this is the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Convert to hex string with 0x prefix
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// XOR distance between two addresses.
    pub fn xor_distance(&self, other: &Address) -> Address {
        let mut out = [0u8; 20];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }
        Address(out)
    }

    /// Number of leading bits the two addresses share (0..=160).
    pub fn common_prefix_len(&self, other: &Address) -> usize {
        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            let x = a ^ b;
            if x != 0 {
                return i * 8 + x.leading_zeros() as usize;
            }
        }
        Self::BITS
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<[u8; 20]> for Address {
    fn from(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr_with_first(byte: u8) -> Address {
        let mut bytes = [0u8; 20];
        bytes[0] = byte;
        Address::from_bytes(bytes)
    }

    // ==================== Parsing tests ====================

    #[test]
    fn test_address_from_hex() {
        let addr = Address::from_hex("0x742d35Cc6634C0532925a3b844Bc9e7595f0aB3d").unwrap();
        let addr2: Address = "742d35cc6634c0532925a3b844bc9e7595f0ab3d".parse().unwrap();
        assert_eq!(addr, addr2);
        assert_eq!(addr.to_hex(), "0x742d35cc6634c0532925a3b844bc9e7595f0ab3d");
    }

    #[test]
    fn test_address_from_hex_wrong_length() {
        match Address::from_hex("0x742d35Cc6634C0532925a3b844Bc9e7595f0aB") {
            Err(AddressError::InvalidLength(19)) => {}
            other => panic!("expected InvalidLength(19), got {:?}", other),
        }
    }

    #[test]
    fn test_address_from_hex_invalid_chars() {
        assert!(matches!(
            Address::from_hex("0xzz2d35Cc6634C0532925a3b844Bc9e7595f0aB3d"),
            Err(AddressError::InvalidHex(_))
        ));
    }

    // ==================== Distance tests ====================

    #[test]
    fn test_xor_distance_to_self_is_zero() {
        let a = Address::random();
        assert!(a.xor_distance(&a).is_zero());
    }

    #[test]
    fn test_xor_distance_is_symmetric() {
        let a = Address::random();
        let b = Address::random();
        assert_eq!(a.xor_distance(&b), b.xor_distance(&a));
    }

    #[test]
    fn test_common_prefix_len() {
        let zero = Address::ZERO;
        assert_eq!(zero.common_prefix_len(&zero), Address::BITS);
        assert_eq!(zero.common_prefix_len(&addr_with_first(0x80)), 0);
        assert_eq!(zero.common_prefix_len(&addr_with_first(0x01)), 7);

        let mut bytes = [0u8; 20];
        bytes[19] = 0x01;
        assert_eq!(zero.common_prefix_len(&Address::from_bytes(bytes)), 159);
    }

    #[test]
    fn test_ordering_matches_distance() {
        let target = Address::ZERO;
        let near = addr_with_first(0x01);
        let far = addr_with_first(0x80);
        assert!(near.xor_distance(&target) < far.xor_distance(&target));
    }

    // ==================== Formatting tests ====================

    #[test]
    fn test_address_debug_and_display() {
        let addr = addr_with_first(0xab);
        assert!(format!("{:?}", addr).starts_with("Address(0xab"));
        assert!(format!("{}", addr).starts_with("0xab"));
    }
}
