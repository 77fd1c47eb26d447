use async_trait::async_trait;
use thiserror::Error;
use veilbond_types::{
    AttestationId, AttestationRecord, Bond, BondAmount, BondId, BondState, ContextId,
    EvidenceHash, JobStatus, ReputationRecord, SealedEvidence, SenderCommitment, SlashJob,
};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("storage backend error: {0}")]
    BackendError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// All persisted engine state flows through this trait: no component
/// holds process-global maps, so multiple instances can share a
/// backend and a restart loses nothing.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ---- bonds ----

    /// Insert a new bond record.
    async fn put_bond(&self, bond: &Bond) -> Result<()>;

    /// Fetch a bond by id.
    async fn get_bond(&self, id: &BondId) -> Result<Option<Bond>>;

    /// Atomically replace a bond iff its stored state equals `expected`.
    /// Returns false when another transition won the race.
    async fn swap_bond_if(&self, expected: BondState, bond: &Bond) -> Result<bool>;

    /// Bonds posted by a sender within one context, newest first.
    async fn bonds_for_sender(
        &self,
        context_id: &ContextId,
        commitment: &SenderCommitment,
    ) -> Result<Vec<Bond>>;

    /// All bonds still in a non-terminal state, for the expiry sweep.
    async fn unresolved_bonds(&self) -> Result<Vec<Bond>>;

    // ---- reputation ----

    async fn get_reputation(&self, commitment: &SenderCommitment)
        -> Result<Option<ReputationRecord>>;

    async fn put_reputation(&self, record: &ReputationRecord) -> Result<()>;

    // ---- attestations ----

    async fn put_attestation(&self, record: &AttestationRecord) -> Result<()>;

    async fn get_attestation(&self, id: &AttestationId) -> Result<Option<AttestationRecord>>;

    async fn attestations_for_bond(&self, bond_id: &BondId) -> Result<Vec<AttestationRecord>>;

    /// Drop resolved attestations whose challenge window ended at or
    /// before `cutoff` (retention = window + grace); returns how many.
    async fn prune_attestations(&self, cutoff: i64) -> Result<usize>;

    // ---- evidence ----

    /// Write-once: storing under an existing hash is `AlreadyExists`.
    async fn put_evidence(&self, sealed: &SealedEvidence) -> Result<()>;

    async fn get_evidence(&self, hash: &EvidenceHash) -> Result<Option<SealedEvidence>>;

    /// Hashes whose retention expired at or before `now`.
    async fn expired_evidence(&self, now: i64) -> Result<Vec<EvidenceHash>>;

    async fn delete_evidence(&self, hash: &EvidenceHash) -> Result<()>;

    // ---- slash jobs ----

    async fn put_job(&self, job: &SlashJob) -> Result<()>;

    async fn get_job(&self, attestation_id: &AttestationId) -> Result<Option<SlashJob>>;

    /// Atomically replace a job iff its stored status equals `expected`.
    /// This is how an executor claims a pending job exactly once.
    async fn swap_job_if(&self, expected: JobStatus, job: &SlashJob) -> Result<bool>;

    /// Pending jobs whose next attempt is due at or before `now`.
    async fn due_jobs(&self, now: i64) -> Result<Vec<SlashJob>>;

    // ---- safety pool ----

    /// Credit slashed funds to a context's pool; returns the new balance.
    async fn credit_safety_pool(
        &self,
        context_id: &ContextId,
        amount: BondAmount,
    ) -> Result<BondAmount>;

    async fn safety_pool_balance(&self, context_id: &ContextId) -> Result<BondAmount>;

    // ---- replay index ----

    /// Record a content fingerprint with an expiry. Returns false if it
    /// was already present (replay).
    async fn insert_fingerprint(&self, fingerprint: &[u8; 32], expires_at: i64) -> Result<bool>;

    /// Drop fingerprints past their freshness window; returns how many.
    async fn prune_fingerprints(&self, now: i64) -> Result<usize>;

    // ---- maintenance ----

    async fn flush(&self) -> Result<()>;

    async fn get_stats(&self) -> Result<StorageStats>;
}

#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub bond_count: usize,
    pub unresolved_bond_count: usize,
    pub reputation_entries: usize,
    pub attestation_count: usize,
    pub evidence_count: usize,
    pub pending_jobs: usize,
    pub fingerprint_entries: usize,
}
