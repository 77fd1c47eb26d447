use crate::{AttestationId, BondId, EvidenceHash};
use serde::{Deserialize, Serialize};

/// Workflow state of an abuse attestation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttestationStatus {
    /// Report accepted, bond frozen
    Filed,

    /// Slash job durably queued for the challenge-window end
    Scheduled,

    /// Slash executed
    Executed,

    /// Dispute upheld before the window closed, bond refunded
    Disputed,
}

/// Retained past the challenge window (window + grace) for dispute audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationRecord {
    pub id: AttestationId,
    pub bond_id: BondId,
    pub evidence_hash: EvidenceHash,
    /// Opaque attestor handle, checked against the context's guardian set
    pub attestor: String,
    pub status: AttestationStatus,
    pub created_at: i64,
    pub challenge_end: i64,
    /// Evidence supplied by a successful dispute
    pub counter_evidence: Option<EvidenceHash>,
}

impl AttestationRecord {
    /// A dispute is admissible strictly before the window closes.
    pub fn disputable(&self, now: i64) -> bool {
        matches!(
            self.status,
            AttestationStatus::Filed | AttestationStatus::Scheduled
        ) && now < self.challenge_end
    }
}
