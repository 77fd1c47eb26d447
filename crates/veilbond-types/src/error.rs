use crate::{BondAmount, BondId, BondState, ContextId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BondError {
    #[error("bond amount {offered} below required minimum {required}")]
    PolicyViolation {
        offered: BondAmount,
        required: BondAmount,
    },

    #[error("illegal transition for bond {bond_id}: {from} -> {attempted}")]
    InvalidTransition {
        bond_id: BondId,
        from: BondState,
        attempted: BondState,
    },

    /// A benign race: another valid transition won. Idempotent paths
    /// absorb this silently; it is never surfaced as a failure.
    #[error("bond {0} already resolved")]
    AlreadyResolved(BondId),

    #[error("actor {actor} not authorized for context {context_id}")]
    Unauthorized { context_id: ContextId, actor: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("backing store unavailable: {0}")]
    BackingStoreUnavailable(String),

    #[error("slashing failed for bond {bond_id} after {attempts} attempts")]
    SlashingFailed { bond_id: BondId, attempts: u32 },

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: i64 },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for BondError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BondError>;
