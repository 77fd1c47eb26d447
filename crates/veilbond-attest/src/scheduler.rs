use prometheus::IntCounter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use veilbond_ledger::{AuthorityProvider, BondLedger};
use veilbond_storage::StorageBackend;
use veilbond_types::{
    AttestationId, AttestationRecord, AttestationStatus, BondError, ContextId, EvidenceHash,
    JobStatus, Result, SenderCommitment, SlashJob,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestConfig {
    /// Retry budget for a slash job before it is declared failed
    pub max_slash_attempts: u32,

    /// First retry delay; doubles per attempt
    pub retry_base_delay_secs: i64,

    /// How long resolved attestations are kept past their window
    pub retention_grace_secs: i64,

    /// Timeout for authorization calls, in milliseconds
    pub authority_timeout_ms: u64,
}

impl Default for AttestConfig {
    fn default() -> Self {
        Self {
            max_slash_attempts: 5,
            retry_base_delay_secs: 30,
            retention_grace_secs: 7 * 24 * 3600,
            authority_timeout_ms: 5_000,
        }
    }
}

/// Orchestrates the challenge-window workflow: freeze on report,
/// durably schedule the slash, execute with bounded retries, honor
/// disputes until the window closes.
///
/// Jobs live in the storage backend rather than in timers, so a crash
/// between freeze and slash loses nothing; after restart the poll loop
/// picks the job up again. Execution is at-least-once and the slash
/// handler is idempotent.
pub struct SlashScheduler {
    storage: Arc<dyn StorageBackend>,
    ledger: Arc<BondLedger>,
    authority: Arc<dyn AuthorityProvider>,
    config: AttestConfig,
    // Metrics counters - wired by the node when metrics are enabled
    pub attestations_filed: Option<Arc<IntCounter>>,
    pub slashes_executed: Option<Arc<IntCounter>>,
    pub slashes_failed: Option<Arc<IntCounter>>,
    pub disputes_upheld: Option<Arc<IntCounter>>,
}

impl SlashScheduler {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        ledger: Arc<BondLedger>,
        authority: Arc<dyn AuthorityProvider>,
        config: AttestConfig,
    ) -> Self {
        Self {
            storage,
            ledger,
            authority,
            config,
            attestations_filed: None,
            slashes_executed: None,
            slashes_failed: None,
            disputes_upheld: None,
        }
    }

    pub fn set_metrics(
        &mut self,
        attestations_filed: Arc<IntCounter>,
        slashes_executed: Arc<IntCounter>,
        slashes_failed: Arc<IntCounter>,
        disputes_upheld: Arc<IntCounter>,
    ) {
        self.attestations_filed = Some(attestations_filed);
        self.slashes_executed = Some(slashes_executed);
        self.slashes_failed = Some(slashes_failed);
        self.disputes_upheld = Some(disputes_upheld);
    }

    /// File an abuse report against the sender's active bond. Freezes
    /// the bond and durably schedules its slash for the end of the
    /// challenge window.
    pub async fn file_attestation(
        &self,
        context_id: &ContextId,
        sender_commitment: &SenderCommitment,
        evidence_hash: EvidenceHash,
        attestor: &str,
        now: i64,
    ) -> Result<AttestationId> {
        let timeout = Duration::from_millis(self.config.authority_timeout_ms);
        let authorized = tokio::time::timeout(
            timeout,
            self.authority.authorize_admin(context_id, attestor),
        )
        .await
        .map_err(|_| BondError::BackingStoreUnavailable("authority call timed out".to_string()))?
        .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;

        if !authorized {
            warn!(
                context_id = %context_id,
                attestor = attestor,
                "unauthorized attestation attempt"
            );
            return Err(BondError::Unauthorized {
                context_id: *context_id,
                actor: attestor.to_string(),
            });
        }

        let bond = self
            .ledger
            .active_bond(context_id, sender_commitment, now)
            .await?
            .ok_or_else(|| {
                BondError::NotFound(format!(
                    "no active bond for sender {} in context {}",
                    sender_commitment, context_id
                ))
            })?;

        let policy = self.ledger.context_policy(context_id).await?;
        self.ledger.freeze_bond(&bond.id, now).await?;

        let challenge_end = now + policy.challenge_window_secs;

        let mut id_material = Vec::new();
        id_material.extend_from_slice(bond.id.as_bytes());
        id_material.extend_from_slice(evidence_hash.as_bytes());
        id_material.extend_from_slice(attestor.as_bytes());
        id_material.extend_from_slice(&now.to_le_bytes());
        let attestation_id = AttestationId::new(&id_material);

        let mut record = AttestationRecord {
            id: attestation_id,
            bond_id: bond.id,
            evidence_hash,
            attestor: attestor.to_string(),
            status: AttestationStatus::Filed,
            created_at: now,
            challenge_end,
            counter_evidence: None,
        };
        self.put_attestation(&record).await?;

        let job = SlashJob::new(attestation_id, bond.id, challenge_end);
        self.storage
            .put_job(&job)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;

        record.status = AttestationStatus::Scheduled;
        self.put_attestation(&record).await?;

        if let Some(ref counter) = self.attestations_filed {
            counter.inc();
        }

        info!(
            attestation_id = %attestation_id,
            bond_id = %bond.id,
            context_id = %context_id,
            evidence = %evidence_hash,
            challenge_end,
            "🎯 Attestation filed, slash scheduled"
        );
        Ok(attestation_id)
    }

    /// Uphold a dispute before the challenge window closes: cancel the
    /// pending slash job and refund the bond.
    pub async fn dispute_attestation(
        &self,
        attestation_id: &AttestationId,
        counter_evidence: EvidenceHash,
        now: i64,
    ) -> Result<()> {
        let mut record = self.get_attestation(attestation_id).await?;

        match record.status {
            AttestationStatus::Disputed => {
                debug!(attestation_id = %attestation_id, "dispute of settled attestation, no-op");
                return Ok(());
            }
            AttestationStatus::Executed => {
                return Err(BondError::AlreadyResolved(record.bond_id));
            }
            AttestationStatus::Filed | AttestationStatus::Scheduled => {}
        }

        if now >= record.challenge_end {
            return Err(BondError::InvalidParameter(format!(
                "challenge window for {} closed at {}",
                attestation_id, record.challenge_end
            )));
        }

        // Cancel the scheduled job; a job already claimed by an
        // executor runs to completion and the dispute is too late.
        if let Some(job) = self
            .storage
            .get_job(attestation_id)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?
        {
            let mut cancelled = job.clone();
            cancelled.status = JobStatus::Cancelled;
            let won = self
                .storage
                .swap_job_if(JobStatus::Pending, &cancelled)
                .await
                .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;
            if !won && job.status != JobStatus::Cancelled {
                return Err(BondError::AlreadyResolved(record.bond_id));
            }
        }

        self.ledger.refund_bond(&record.bond_id, now).await?;

        record.status = AttestationStatus::Disputed;
        record.counter_evidence = Some(counter_evidence);
        self.put_attestation(&record).await?;

        if let Some(ref counter) = self.disputes_upheld {
            counter.inc();
        }

        info!(
            attestation_id = %attestation_id,
            bond_id = %record.bond_id,
            counter_evidence = %counter_evidence,
            "✅ Dispute upheld, slash cancelled"
        );
        Ok(())
    }

    pub async fn get_attestation(&self, id: &AttestationId) -> Result<AttestationRecord> {
        self.storage
            .get_attestation(id)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?
            .ok_or_else(|| BondError::NotFound(format!("attestation {}", id)))
    }

    /// One scheduler tick: claim and execute every due job. Called by
    /// the node's poll loop; safe to call from several workers because
    /// claiming is a compare-and-swap.
    pub async fn run_due_jobs(&self, now: i64) -> Result<usize> {
        let due = self
            .storage
            .due_jobs(now)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;

        let mut executed = 0;
        for job in due {
            match self.execute_job(job, now).await {
                Ok(true) => executed += 1,
                Ok(false) => {}
                Err(e) => {
                    // Job-level failures are alerts, not tick aborts
                    error!(error = %e, "slash job execution failed");
                }
            }
        }
        Ok(executed)
    }

    async fn execute_job(&self, job: SlashJob, now: i64) -> Result<bool> {
        let mut claimed = job.clone();
        claimed.status = JobStatus::Running;
        claimed.attempts = job.attempts + 1;

        let won = self
            .storage
            .swap_job_if(JobStatus::Pending, &claimed)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;
        if !won {
            // Cancelled by a dispute or claimed by another worker
            return Ok(false);
        }

        // Any failure here drops into the retry path below; the claim
        // must never strand a job in Running
        let outcome: Result<AttestationRecord> = async {
            let record = self.get_attestation(&job.attestation_id).await?;
            let bond = self.ledger.get_bond(&job.bond_id).await?;
            self.ledger
                .slash_bond(&job.bond_id, &record.evidence_hash, &bond.nullifier, now)
                .await?;
            Ok(record)
        }
        .await;

        match outcome {
            Ok(record) => {
                claimed.status = JobStatus::Done;
                self.swap_running(&claimed).await?;

                let mut updated = record;
                updated.status = AttestationStatus::Executed;
                self.put_attestation(&updated).await?;

                if let Some(ref counter) = self.slashes_executed {
                    counter.inc();
                }
                info!(
                    attestation_id = %job.attestation_id,
                    bond_id = %job.bond_id,
                    attempt = claimed.attempts,
                    "⚡ Scheduled slash executed"
                );
                Ok(true)
            }
            Err(BondError::AlreadyResolved(_)) | Err(BondError::InvalidTransition { .. }) => {
                // The bond resolved some other way (e.g. expiry refund
                // raced the window end); nothing left to slash
                claimed.status = JobStatus::Done;
                self.swap_running(&claimed).await?;
                warn!(
                    attestation_id = %job.attestation_id,
                    bond_id = %job.bond_id,
                    "slash job found bond already resolved"
                );
                Ok(false)
            }
            Err(e) => {
                if claimed.attempts >= self.config.max_slash_attempts {
                    claimed.status = JobStatus::Failed;
                    self.swap_running(&claimed).await?;

                    if let Some(ref counter) = self.slashes_failed {
                        counter.inc();
                    }
                    // The bond stays frozen: funds are never silently
                    // lost track of, an operator has to step in
                    error!(
                        attestation_id = %job.attestation_id,
                        bond_id = %job.bond_id,
                        attempts = claimed.attempts,
                        error = %e,
                        "🚨 Slash retry budget exhausted"
                    );
                    Err(BondError::SlashingFailed {
                        bond_id: job.bond_id,
                        attempts: claimed.attempts,
                    })
                } else {
                    let delay = self.config.retry_base_delay_secs
                        << (claimed.attempts.saturating_sub(1)).min(16);
                    claimed.status = JobStatus::Pending;
                    claimed.next_attempt_at = now + delay;
                    self.swap_running(&claimed).await?;

                    warn!(
                        attestation_id = %job.attestation_id,
                        bond_id = %job.bond_id,
                        attempt = claimed.attempts,
                        retry_at = claimed.next_attempt_at,
                        error = %e,
                        "🔄 Slash failed, retry scheduled"
                    );
                    Ok(false)
                }
            }
        }
    }

    async fn swap_running(&self, job: &SlashJob) -> Result<()> {
        self.storage
            .swap_job_if(JobStatus::Running, job)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Drop resolved attestations older than window + grace.
    pub async fn prune_resolved(&self, now: i64) -> Result<usize> {
        let cutoff = now - self.config.retention_grace_secs;
        self.storage
            .prune_attestations(cutoff)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))
    }

    async fn put_attestation(&self, record: &AttestationRecord) -> Result<()> {
        self.storage
            .put_attestation(record)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))
    }
}
