use crate::{BondAmount, SenderCommitment};
use serde::{Deserialize, Serialize};

/// Per-commitment counters. Created lazily on first bond, updated
/// monotonically, never deleted; decay is a pricing concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub sender_commitment: SenderCommitment,
    pub posted_count: u64,
    pub slashed_count: u64,
    pub engaged_count: u64,
    pub last_slash_at: Option<i64>,
    pub total_slashed: BondAmount,
}

impl ReputationRecord {
    pub fn new(sender_commitment: SenderCommitment) -> Self {
        Self {
            sender_commitment,
            posted_count: 0,
            slashed_count: 0,
            engaged_count: 0,
            last_slash_at: None,
            total_slashed: BondAmount::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_record_is_clean() {
        let rep = ReputationRecord::new(SenderCommitment::from_bytes([1; 32]));
        assert_eq!(rep.posted_count, 0);
        assert_eq!(rep.slashed_count, 0);
        assert!(rep.last_slash_at.is_none());
        assert_eq!(rep.total_slashed, BondAmount::ZERO);
    }
}
