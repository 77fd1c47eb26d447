use crate::backend::{Result, StorageBackend, StorageError, StorageStats};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use veilbond_types::{
    AttestationId, AttestationRecord, Bond, BondAmount, BondId, BondState, ContextId,
    EvidenceHash, JobStatus, ReputationRecord, SealedEvidence, SenderCommitment, SlashJob,
};

/// In-memory backend for tests and single-process development.
pub struct MemoryBackend {
    bonds: Arc<RwLock<HashMap<BondId, Bond>>>,
    bonds_by_sender: Arc<RwLock<HashMap<(ContextId, SenderCommitment), Vec<BondId>>>>,
    reputation: Arc<RwLock<HashMap<SenderCommitment, ReputationRecord>>>,
    attestations: Arc<RwLock<HashMap<AttestationId, AttestationRecord>>>,
    attestations_by_bond: Arc<RwLock<HashMap<BondId, Vec<AttestationId>>>>,
    evidence: Arc<RwLock<HashMap<EvidenceHash, SealedEvidence>>>,
    jobs: Arc<RwLock<HashMap<AttestationId, SlashJob>>>,
    safety_pools: Arc<RwLock<HashMap<ContextId, BondAmount>>>,
    fingerprints: Arc<RwLock<HashMap<[u8; 32], i64>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            bonds: Arc::new(RwLock::new(HashMap::new())),
            bonds_by_sender: Arc::new(RwLock::new(HashMap::new())),
            reputation: Arc::new(RwLock::new(HashMap::new())),
            attestations: Arc::new(RwLock::new(HashMap::new())),
            attestations_by_bond: Arc::new(RwLock::new(HashMap::new())),
            evidence: Arc::new(RwLock::new(HashMap::new())),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            safety_pools: Arc::new(RwLock::new(HashMap::new())),
            fingerprints: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put_bond(&self, bond: &Bond) -> Result<()> {
        let mut bonds = self.bonds.write().await;
        if bonds.contains_key(&bond.id) {
            return Err(StorageError::AlreadyExists(bond.id.to_string()));
        }
        bonds.insert(bond.id, bond.clone());

        let mut index = self.bonds_by_sender.write().await;
        index
            .entry((bond.context_id, bond.sender_commitment))
            .or_default()
            .push(bond.id);
        Ok(())
    }

    async fn get_bond(&self, id: &BondId) -> Result<Option<Bond>> {
        let bonds = self.bonds.read().await;
        Ok(bonds.get(id).cloned())
    }

    async fn swap_bond_if(&self, expected: BondState, bond: &Bond) -> Result<bool> {
        let mut bonds = self.bonds.write().await;
        match bonds.get_mut(&bond.id) {
            Some(stored) if stored.state == expected => {
                *stored = bond.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound(bond.id.to_string())),
        }
    }

    async fn bonds_for_sender(
        &self,
        context_id: &ContextId,
        commitment: &SenderCommitment,
    ) -> Result<Vec<Bond>> {
        let index = self.bonds_by_sender.read().await;
        let bonds = self.bonds.read().await;

        let mut out: Vec<Bond> = index
            .get(&(*context_id, *commitment))
            .map(|ids| ids.iter().filter_map(|id| bonds.get(id).cloned()).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
        Ok(out)
    }

    async fn unresolved_bonds(&self) -> Result<Vec<Bond>> {
        let bonds = self.bonds.read().await;
        Ok(bonds
            .values()
            .filter(|b| !b.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn get_reputation(
        &self,
        commitment: &SenderCommitment,
    ) -> Result<Option<ReputationRecord>> {
        let reputation = self.reputation.read().await;
        Ok(reputation.get(commitment).cloned())
    }

    async fn put_reputation(&self, record: &ReputationRecord) -> Result<()> {
        let mut reputation = self.reputation.write().await;
        reputation.insert(record.sender_commitment, record.clone());
        Ok(())
    }

    async fn put_attestation(&self, record: &AttestationRecord) -> Result<()> {
        let mut attestations = self.attestations.write().await;
        let fresh = !attestations.contains_key(&record.id);
        attestations.insert(record.id, record.clone());

        if fresh {
            let mut index = self.attestations_by_bond.write().await;
            index.entry(record.bond_id).or_default().push(record.id);
        }
        Ok(())
    }

    async fn get_attestation(&self, id: &AttestationId) -> Result<Option<AttestationRecord>> {
        let attestations = self.attestations.read().await;
        Ok(attestations.get(id).cloned())
    }

    async fn attestations_for_bond(&self, bond_id: &BondId) -> Result<Vec<AttestationRecord>> {
        let index = self.attestations_by_bond.read().await;
        let attestations = self.attestations.read().await;
        Ok(index
            .get(bond_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| attestations.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn prune_attestations(&self, cutoff: i64) -> Result<usize> {
        use veilbond_types::AttestationStatus;

        let mut attestations = self.attestations.write().await;
        let mut index = self.attestations_by_bond.write().await;

        let before = attestations.len();
        attestations.retain(|_, a| {
            !(a.challenge_end <= cutoff
                && matches!(
                    a.status,
                    AttestationStatus::Executed | AttestationStatus::Disputed
                ))
        });
        for ids in index.values_mut() {
            ids.retain(|id| attestations.contains_key(id));
        }
        Ok(before - attestations.len())
    }

    async fn put_evidence(&self, sealed: &SealedEvidence) -> Result<()> {
        let mut evidence = self.evidence.write().await;
        if evidence.contains_key(&sealed.evidence_hash) {
            return Err(StorageError::AlreadyExists(sealed.evidence_hash.to_string()));
        }
        evidence.insert(sealed.evidence_hash, sealed.clone());
        Ok(())
    }

    async fn get_evidence(&self, hash: &EvidenceHash) -> Result<Option<SealedEvidence>> {
        let evidence = self.evidence.read().await;
        Ok(evidence.get(hash).cloned())
    }

    async fn expired_evidence(&self, now: i64) -> Result<Vec<EvidenceHash>> {
        let evidence = self.evidence.read().await;
        Ok(evidence
            .values()
            .filter(|e| e.expires_at <= now)
            .map(|e| e.evidence_hash)
            .collect())
    }

    async fn delete_evidence(&self, hash: &EvidenceHash) -> Result<()> {
        let mut evidence = self.evidence.write().await;
        evidence.remove(hash);
        Ok(())
    }

    async fn put_job(&self, job: &SlashJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.attestation_id, job.clone());
        Ok(())
    }

    async fn get_job(&self, attestation_id: &AttestationId) -> Result<Option<SlashJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(attestation_id).cloned())
    }

    async fn swap_job_if(&self, expected: JobStatus, job: &SlashJob) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.attestation_id) {
            Some(stored) if stored.status == expected => {
                *stored = job.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StorageError::NotFound(job.attestation_id.to_string())),
        }
    }

    async fn due_jobs(&self, now: i64) -> Result<Vec<SlashJob>> {
        let jobs = self.jobs.read().await;
        let mut due: Vec<SlashJob> = jobs.values().filter(|j| j.is_due(now)).cloned().collect();
        due.sort_by_key(|j| j.next_attempt_at);
        Ok(due)
    }

    async fn credit_safety_pool(
        &self,
        context_id: &ContextId,
        amount: BondAmount,
    ) -> Result<BondAmount> {
        let mut pools = self.safety_pools.write().await;
        let balance = pools.entry(*context_id).or_insert(BondAmount::ZERO);
        *balance = balance.saturating_add(amount);
        Ok(*balance)
    }

    async fn safety_pool_balance(&self, context_id: &ContextId) -> Result<BondAmount> {
        let pools = self.safety_pools.read().await;
        Ok(pools.get(context_id).copied().unwrap_or(BondAmount::ZERO))
    }

    async fn insert_fingerprint(&self, fingerprint: &[u8; 32], expires_at: i64) -> Result<bool> {
        let mut fingerprints = self.fingerprints.write().await;
        if fingerprints.contains_key(fingerprint) {
            return Ok(false);
        }
        fingerprints.insert(*fingerprint, expires_at);
        Ok(true)
    }

    async fn prune_fingerprints(&self, now: i64) -> Result<usize> {
        let mut fingerprints = self.fingerprints.write().await;
        let before = fingerprints.len();
        fingerprints.retain(|_, expires_at| *expires_at > now);
        Ok(before - fingerprints.len())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        let bonds = self.bonds.read().await;
        let reputation = self.reputation.read().await;
        let attestations = self.attestations.read().await;
        let evidence = self.evidence.read().await;
        let jobs = self.jobs.read().await;
        let fingerprints = self.fingerprints.read().await;

        Ok(StorageStats {
            bond_count: bonds.len(),
            unresolved_bond_count: bonds.values().filter(|b| !b.state.is_terminal()).count(),
            reputation_entries: reputation.len(),
            attestation_count: attestations.len(),
            evidence_count: evidence.len(),
            pending_jobs: jobs
                .values()
                .filter(|j| j.status == JobStatus::Pending)
                .count(),
            fingerprint_entries: fingerprints.len(),
        })
    }
}
