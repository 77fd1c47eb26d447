use crate::BondAmount;
use serde::{Deserialize, Serialize};

/// Policy attached to a sharing context, owned by the settlement
/// collaborator. The engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPolicy {
    pub requires_bond: bool,
    pub base_minimum: BondAmount,
    /// Bond lifetime in seconds
    pub ttl_secs: i64,
    /// Dispute period after an attestation, in seconds
    pub challenge_window_secs: i64,
}

impl Default for ContextPolicy {
    fn default() -> Self {
        Self {
            requires_bond: true,
            base_minimum: BondAmount::from_units(1),
            ttl_secs: 7 * 24 * 3600,
            challenge_window_secs: 24 * 3600,
        }
    }
}

/// What happens to a bond whose TTL elapses with no resolution.
/// Refund is the default: absence of recipient engagement is not
/// evidence of abuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpiryDefault {
    Refund,
    Forfeit,
}
