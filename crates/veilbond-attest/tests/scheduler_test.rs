use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use veilbond_attest::{AttestConfig, SlashScheduler};
use veilbond_ledger::{BondLedger, LedgerConfig, MemorySettlement, ReputationStore, StaticAuthority};
use veilbond_storage::{MemoryBackend, StorageBackend, StorageError};
use veilbond_types::{
    AttestationStatus, Bond, BondAmount, BondError, BondId, BondState, ContextId, ContextPolicy,
    EvidenceHash, JobStatus, SenderCommitment, SenderNullifier,
};

const NOW: i64 = 1_700_000_000;
const TTL: i64 = 7 * 24 * 3600;
const WINDOW: i64 = 24 * 3600;

struct Fixture {
    storage: Arc<dyn StorageBackend>,
    ledger: Arc<BondLedger>,
    scheduler: SlashScheduler,
    context_id: ContextId,
    sender: SenderCommitment,
}

async fn fixture_on(storage: Arc<dyn StorageBackend>) -> Fixture {
    let settlement = Arc::new(MemorySettlement::new());
    let context_id = ContextId::new(b"recipient-card");
    settlement
        .set_policy(
            context_id,
            ContextPolicy {
                requires_bond: true,
                base_minimum: BondAmount::from_units(5),
                ttl_secs: TTL,
                challenge_window_secs: WINDOW,
            },
        )
        .await;

    let reputation = Arc::new(ReputationStore::new(storage.clone()));
    let ledger = Arc::new(BondLedger::new(
        storage.clone(),
        settlement,
        reputation,
        LedgerConfig::default(),
    ));

    let authority = Arc::new(StaticAuthority::new());
    authority.grant(context_id, "guardian").await;

    let scheduler = SlashScheduler::new(
        storage.clone(),
        ledger.clone(),
        authority,
        AttestConfig::default(),
    );

    Fixture {
        storage,
        ledger,
        scheduler,
        context_id,
        sender: SenderCommitment::from_bytes([42; 32]),
    }
}

async fn fixture() -> Fixture {
    fixture_on(Arc::new(MemoryBackend::new())).await
}

impl Fixture {
    async fn post(&self, units: u64) -> BondId {
        self.ledger
            .post_bond(
                &self.context_id,
                &self.sender,
                SenderNullifier::from_bytes([77; 32]),
                BondAmount::from_units(units),
                TTL,
                NOW,
            )
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_dispute_before_window_cancels_slash() {
    // 5-unit bond, attested, disputed before the window closes
    let f = fixture().await;
    let bond_id = f.post(5).await;

    let attestation_id = f
        .scheduler
        .file_attestation(
            &f.context_id,
            &f.sender,
            EvidenceHash::new(b"E"),
            "guardian",
            NOW + 10,
        )
        .await
        .unwrap();

    assert_eq!(
        f.ledger.get_bond(&bond_id).await.unwrap().state,
        BondState::Frozen
    );

    f.scheduler
        .dispute_attestation(&attestation_id, EvidenceHash::new(b"counter"), NOW + 100)
        .await
        .unwrap();

    let bond = f.ledger.get_bond(&bond_id).await.unwrap();
    assert_eq!(bond.state, BondState::Refunded);

    let record = f.scheduler.get_attestation(&attestation_id).await.unwrap();
    assert_eq!(record.status, AttestationStatus::Disputed);
    assert_eq!(record.counter_evidence, Some(EvidenceHash::new(b"counter")));

    let job = f.storage.get_job(&attestation_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);

    // The cancelled job never fires, even long after the window
    let executed = f
        .scheduler
        .run_due_jobs(NOW + WINDOW + 1_000)
        .await
        .unwrap();
    assert_eq!(executed, 0);
    assert_eq!(
        f.ledger.get_bond(&bond_id).await.unwrap().state,
        BondState::Refunded
    );
}

#[tokio::test]
async fn test_window_elapses_and_slash_executes() {
    // 5-unit bond, attested, window elapses with no dispute
    let f = fixture().await;
    let bond_id = f.post(5).await;

    let attestation_id = f
        .scheduler
        .file_attestation(
            &f.context_id,
            &f.sender,
            EvidenceHash::new(b"E"),
            "guardian",
            NOW + 10,
        )
        .await
        .unwrap();

    // Window still open: the job is not due yet
    assert_eq!(f.scheduler.run_due_jobs(NOW + 100).await.unwrap(), 0);
    assert_eq!(
        f.ledger.get_bond(&bond_id).await.unwrap().state,
        BondState::Frozen
    );

    let fired_at = NOW + 10 + WINDOW;
    assert_eq!(f.scheduler.run_due_jobs(fired_at).await.unwrap(), 1);

    let bond = f.ledger.get_bond(&bond_id).await.unwrap();
    assert_eq!(bond.state, BondState::Slashed);

    let rep = f.ledger.reputation().get(&f.sender).await.unwrap();
    assert_eq!(rep.slashed_count, 1);
    assert_eq!(
        f.ledger.safety_pool_balance(&f.context_id).await.unwrap(),
        BondAmount::from_units(5)
    );

    let record = f.scheduler.get_attestation(&attestation_id).await.unwrap();
    assert_eq!(record.status, AttestationStatus::Executed);

    // Redelivered job is a harmless no-op
    assert_eq!(f.scheduler.run_due_jobs(fired_at + 60).await.unwrap(), 0);
    assert_eq!(
        f.ledger.safety_pool_balance(&f.context_id).await.unwrap(),
        BondAmount::from_units(5)
    );
}

#[tokio::test]
async fn test_dispute_after_window_rejected() {
    let f = fixture().await;
    f.post(5).await;

    let attestation_id = f
        .scheduler
        .file_attestation(
            &f.context_id,
            &f.sender,
            EvidenceHash::new(b"E"),
            "guardian",
            NOW,
        )
        .await
        .unwrap();

    let err = f
        .scheduler
        .dispute_attestation(&attestation_id, EvidenceHash::new(b"late"), NOW + WINDOW)
        .await
        .unwrap_err();
    assert!(matches!(err, BondError::InvalidParameter(_)));
}

#[tokio::test]
async fn test_unauthorized_attestor_rejected() {
    let f = fixture().await;
    f.post(5).await;

    let err = f
        .scheduler
        .file_attestation(
            &f.context_id,
            &f.sender,
            EvidenceHash::new(b"E"),
            "impostor",
            NOW,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BondError::Unauthorized { .. }));

    // Bond untouched by the rejected report
    assert!(f
        .ledger
        .has_active_bond(&f.context_id, &f.sender, NOW + 1)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_attestation_without_active_bond_rejected() {
    let f = fixture().await;

    let err = f
        .scheduler
        .file_attestation(
            &f.context_id,
            &f.sender,
            EvidenceHash::new(b"E"),
            "guardian",
            NOW,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BondError::NotFound(_)));
}

#[tokio::test]
async fn test_scheduled_slash_survives_restart() {
    // The job is persisted, so a fresh scheduler over the same backend
    // picks it up after the window - the crash-between-freeze-and-slash
    // case the durable queue exists for.
    let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());

    let bond_id = {
        let f = fixture_on(storage.clone()).await;
        let bond_id = f.post(5).await;
        f.scheduler
            .file_attestation(
                &f.context_id,
                &f.sender,
                EvidenceHash::new(b"E"),
                "guardian",
                NOW,
            )
            .await
            .unwrap();
        bond_id
        // scheduler and ledger dropped here, simulating the crash
    };

    let f = fixture_on(storage).await;
    assert_eq!(f.scheduler.run_due_jobs(NOW + WINDOW + 1).await.unwrap(), 1);
    assert_eq!(
        f.ledger.get_bond(&bond_id).await.unwrap().state,
        BondState::Slashed
    );
}

#[tokio::test]
async fn test_prune_keeps_unresolved_attestations() {
    let f = fixture().await;
    f.post(5).await;

    let attestation_id = f
        .scheduler
        .file_attestation(
            &f.context_id,
            &f.sender,
            EvidenceHash::new(b"E"),
            "guardian",
            NOW,
        )
        .await
        .unwrap();

    // Scheduled but unresolved: retention never drops it
    let far_future = NOW + 365 * 24 * 3600;
    assert_eq!(f.scheduler.prune_resolved(far_future).await.unwrap(), 0);

    f.scheduler.run_due_jobs(NOW + WINDOW).await.unwrap();
    assert_eq!(f.scheduler.prune_resolved(far_future).await.unwrap(), 1);
    assert!(f.scheduler.get_attestation(&attestation_id).await.is_err());
}

/// Delegating backend whose bond swaps can be switched to fail,
/// standing in for an unreachable store during slash execution.
struct FailingSwapBackend {
    inner: MemoryBackend,
    fail_swaps: AtomicBool,
}

impl FailingSwapBackend {
    fn new() -> Self {
        Self {
            inner: MemoryBackend::new(),
            fail_swaps: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StorageBackend for FailingSwapBackend {
    async fn put_bond(&self, bond: &Bond) -> Result<(), StorageError> {
        self.inner.put_bond(bond).await
    }

    async fn get_bond(&self, id: &BondId) -> Result<Option<Bond>, StorageError> {
        self.inner.get_bond(id).await
    }

    async fn swap_bond_if(
        &self,
        expected: BondState,
        bond: &Bond,
    ) -> Result<bool, StorageError> {
        if self.fail_swaps.load(Ordering::SeqCst) && bond.state == BondState::Slashed {
            return Err(StorageError::BackendError("store unreachable".to_string()));
        }
        self.inner.swap_bond_if(expected, bond).await
    }

    async fn bonds_for_sender(
        &self,
        context_id: &ContextId,
        commitment: &SenderCommitment,
    ) -> Result<Vec<Bond>, StorageError> {
        self.inner.bonds_for_sender(context_id, commitment).await
    }

    async fn unresolved_bonds(&self) -> Result<Vec<Bond>, StorageError> {
        self.inner.unresolved_bonds().await
    }

    async fn get_reputation(
        &self,
        commitment: &SenderCommitment,
    ) -> Result<Option<veilbond_types::ReputationRecord>, StorageError> {
        self.inner.get_reputation(commitment).await
    }

    async fn put_reputation(
        &self,
        record: &veilbond_types::ReputationRecord,
    ) -> Result<(), StorageError> {
        self.inner.put_reputation(record).await
    }

    async fn put_attestation(
        &self,
        record: &veilbond_types::AttestationRecord,
    ) -> Result<(), StorageError> {
        self.inner.put_attestation(record).await
    }

    async fn get_attestation(
        &self,
        id: &veilbond_types::AttestationId,
    ) -> Result<Option<veilbond_types::AttestationRecord>, StorageError> {
        self.inner.get_attestation(id).await
    }

    async fn attestations_for_bond(
        &self,
        bond_id: &BondId,
    ) -> Result<Vec<veilbond_types::AttestationRecord>, StorageError> {
        self.inner.attestations_for_bond(bond_id).await
    }

    async fn prune_attestations(&self, cutoff: i64) -> Result<usize, StorageError> {
        self.inner.prune_attestations(cutoff).await
    }

    async fn put_evidence(
        &self,
        sealed: &veilbond_types::SealedEvidence,
    ) -> Result<(), StorageError> {
        self.inner.put_evidence(sealed).await
    }

    async fn get_evidence(
        &self,
        hash: &EvidenceHash,
    ) -> Result<Option<veilbond_types::SealedEvidence>, StorageError> {
        self.inner.get_evidence(hash).await
    }

    async fn expired_evidence(&self, now: i64) -> Result<Vec<EvidenceHash>, StorageError> {
        self.inner.expired_evidence(now).await
    }

    async fn delete_evidence(&self, hash: &EvidenceHash) -> Result<(), StorageError> {
        self.inner.delete_evidence(hash).await
    }

    async fn put_job(&self, job: &veilbond_types::SlashJob) -> Result<(), StorageError> {
        self.inner.put_job(job).await
    }

    async fn get_job(
        &self,
        attestation_id: &veilbond_types::AttestationId,
    ) -> Result<Option<veilbond_types::SlashJob>, StorageError> {
        self.inner.get_job(attestation_id).await
    }

    async fn swap_job_if(
        &self,
        expected: JobStatus,
        job: &veilbond_types::SlashJob,
    ) -> Result<bool, StorageError> {
        self.inner.swap_job_if(expected, job).await
    }

    async fn due_jobs(&self, now: i64) -> Result<Vec<veilbond_types::SlashJob>, StorageError> {
        self.inner.due_jobs(now).await
    }

    async fn credit_safety_pool(
        &self,
        context_id: &ContextId,
        amount: BondAmount,
    ) -> Result<BondAmount, StorageError> {
        self.inner.credit_safety_pool(context_id, amount).await
    }

    async fn safety_pool_balance(
        &self,
        context_id: &ContextId,
    ) -> Result<BondAmount, StorageError> {
        self.inner.safety_pool_balance(context_id).await
    }

    async fn insert_fingerprint(
        &self,
        fingerprint: &[u8; 32],
        expires_at: i64,
    ) -> Result<bool, StorageError> {
        self.inner.insert_fingerprint(fingerprint, expires_at).await
    }

    async fn prune_fingerprints(&self, now: i64) -> Result<usize, StorageError> {
        self.inner.prune_fingerprints(now).await
    }

    async fn flush(&self) -> Result<(), StorageError> {
        self.inner.flush().await
    }

    async fn get_stats(&self) -> Result<veilbond_storage::StorageStats, StorageError> {
        self.inner.get_stats().await
    }
}

#[tokio::test]
async fn test_retry_budget_exhaustion_leaves_bond_frozen() {
    let backend = Arc::new(FailingSwapBackend::new());
    let f = fixture_on(backend.clone()).await;
    let bond_id = f.post(5).await;

    let attestation_id = f
        .scheduler
        .file_attestation(
            &f.context_id,
            &f.sender,
            EvidenceHash::new(b"E"),
            "guardian",
            NOW,
        )
        .await
        .unwrap();

    // The store starts failing slash transitions after the freeze
    backend.fail_swaps.store(true, Ordering::SeqCst);

    // Drive the clock through every retry until the budget is gone
    let mut now = NOW + WINDOW;
    for _ in 0..AttestConfig::default().max_slash_attempts {
        f.scheduler.run_due_jobs(now).await.unwrap();
        now += 24 * 3600;
    }

    let job = f.storage.get_job(&attestation_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, AttestConfig::default().max_slash_attempts);

    // No silent resolution: the bond stays frozen for the operator
    assert_eq!(
        f.ledger.get_bond(&bond_id).await.unwrap().state,
        BondState::Frozen
    );

    // Once the store recovers nothing fires on its own; the failed job
    // is terminal and needs operator action
    backend.fail_swaps.store(false, Ordering::SeqCst);
    assert_eq!(f.scheduler.run_due_jobs(now).await.unwrap(), 0);
}
