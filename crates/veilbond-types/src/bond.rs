use crate::{BondAmount, BondId, ContextId, SenderCommitment, SenderNullifier};
use serde::{Deserialize, Serialize};

/// Lifecycle of a posted bond.
///
/// Refunded, Slashed and Expired are terminal. Slashing is reachable
/// only through Frozen, never directly from Posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BondState {
    /// Funds escrowed, sender may contact the recipient
    Posted,

    /// Abuse attested, challenge window running
    Frozen,

    /// Returned to the sender
    Refunded,

    /// Forfeited to the context's safety pool
    Slashed,

    /// TTL elapsed with no resolution
    Expired,
}

impl BondState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Refunded | Self::Slashed | Self::Expired)
    }

    /// Legality of a single state transition.
    pub fn can_transition_to(&self, next: BondState) -> bool {
        matches!(
            (self, next),
            (Self::Posted, BondState::Refunded)
                | (Self::Posted, BondState::Frozen)
                | (Self::Posted, BondState::Expired)
                | (Self::Frozen, BondState::Slashed)
                | (Self::Frozen, BondState::Refunded)
                | (Self::Frozen, BondState::Expired)
                | (Self::Expired, BondState::Refunded)
        )
    }
}

impl std::fmt::Display for BondState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Posted => "posted",
            Self::Frozen => "frozen",
            Self::Refunded => "refunded",
            Self::Slashed => "slashed",
            Self::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// A bond record. Kept after terminal transitions for audit and
/// reputation; state changes go through the ledger only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bond {
    pub id: BondId,
    pub context_id: ContextId,
    pub sender_commitment: SenderCommitment,
    pub amount: BondAmount,
    pub state: BondState,
    pub posted_at: i64,
    pub expires_at: i64,
    pub frozen_at: Option<i64>,
    pub resolved_at: Option<i64>,
    /// Opaque reference into the settlement collaborator's escrow
    pub lock_ref: String,
    /// Sender-derived repeat-offense tag, kept sealed until slash time
    pub nullifier: SenderNullifier,
}

impl Bond {
    /// Active means usable for forwarding: non-terminal and unexpired.
    pub fn is_active(&self, now: i64) -> bool {
        !self.state.is_terminal() && now < self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash_only_from_frozen() {
        assert!(!BondState::Posted.can_transition_to(BondState::Slashed));
        assert!(BondState::Frozen.can_transition_to(BondState::Slashed));
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for next in [
            BondState::Posted,
            BondState::Frozen,
            BondState::Refunded,
            BondState::Slashed,
        ] {
            assert!(!BondState::Refunded.can_transition_to(next));
            assert!(!BondState::Slashed.can_transition_to(next));
        }
        // Expired has exactly one exit: the sender-favoring refund
        assert!(BondState::Expired.can_transition_to(BondState::Refunded));
        assert!(!BondState::Expired.can_transition_to(BondState::Slashed));
    }

    #[test]
    fn test_bond_activity_window() {
        let bond = Bond {
            id: BondId::new(b"b"),
            context_id: ContextId::new(b"c"),
            sender_commitment: SenderCommitment::from_bytes([7; 32]),
            amount: BondAmount::from_units(5),
            state: BondState::Posted,
            posted_at: 1_000,
            expires_at: 2_000,
            frozen_at: None,
            resolved_at: None,
            lock_ref: "lock-1".to_string(),
            nullifier: SenderNullifier::from_bytes([0; 32]),
        };
        assert!(bond.is_active(1_500));
        assert!(!bond.is_active(2_000));
    }
}
