//! Evidence of validator misbehavior, gossiped until included in a block

use fugue_primitives::{Address, H256};
use serde::{Deserialize, Serialize};

use crate::codec::content_hash;

/// Evidence identifier
pub type EvidenceId = H256;

/// Misbehavior report against `target` observed at `height`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Height at which the misbehavior happened
    pub height: u64,
    /// Accused validator
    pub target: Address,
    /// Observation time (unix ms)
    pub timestamp: u64,
    /// Opaque proof (e.g. two conflicting votes)
    pub payload: Vec<u8>,
}

impl Evidence {
    /// Create new evidence
    pub fn new(height: u64, target: Address, timestamp: u64, payload: Vec<u8>) -> Self {
        Self {
            height,
            target,
            timestamp,
            payload,
        }
    }

    /// Content id
    pub fn id(&self) -> EvidenceId {
        content_hash(self)
    }

    /// Structural validity: accuses a real address and carries a proof.
    pub fn is_well_formed(&self) -> bool {
        !self.target.is_zero() && !self.payload.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evidence_id_is_deterministic() {
        let target = Address::from_bytes([9u8; 20]);
        let a = Evidence::new(3, target, 10, vec![1, 2]);
        let b = Evidence::new(3, target, 10, vec![1, 2]);
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), Evidence::new(4, target, 10, vec![1, 2]).id());
    }

    #[test]
    fn test_well_formed() {
        assert!(Evidence::new(1, Address::from_bytes([1u8; 20]), 0, vec![0]).is_well_formed());
        assert!(!Evidence::new(1, Address::ZERO, 0, vec![0]).is_well_formed());
        assert!(!Evidence::new(1, Address::from_bytes([1u8; 20]), 0, vec![]).is_well_formed());
    }
}
