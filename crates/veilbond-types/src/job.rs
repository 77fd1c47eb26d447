use crate::{AttestationId, BondId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for its due time
    Pending,

    /// Picked up by an executor; not cancellable any more
    Running,

    /// Slash completed
    Done,

    /// Dispute upheld before execution began
    Cancelled,

    /// Retry budget exhausted, operator alert raised
    Failed,
}

/// A durable slash job. Lives in the storage backend, not in a timer,
/// so a crash between freeze and slash cannot lose the slash.
/// Execution is at-least-once; the handler is idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashJob {
    pub attestation_id: AttestationId,
    pub bond_id: BondId,
    pub due_at: i64,
    pub attempts: u32,
    pub status: JobStatus,
    /// Earliest next attempt; pushed out by backoff after a failure
    pub next_attempt_at: i64,
}

impl SlashJob {
    pub fn new(attestation_id: AttestationId, bond_id: BondId, due_at: i64) -> Self {
        Self {
            attestation_id,
            bond_id,
            due_at,
            attempts: 0,
            status: JobStatus::Pending,
            next_attempt_at: due_at,
        }
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.status == JobStatus::Pending && now >= self.next_attempt_at
    }
}
