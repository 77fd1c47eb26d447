use crate::backend::{Result, StorageBackend, StorageError, StorageStats};
use async_trait::async_trait;
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use veilbond_types::{
    AttestationId, AttestationRecord, Bond, BondAmount, BondId, BondState, ContextId,
    EvidenceHash, JobStatus, ReputationRecord, SealedEvidence, SenderCommitment, SlashJob,
};

/// RocksDB-backed persistence. Durable slash jobs and bond state live
/// here, which is what lets the scheduler survive restarts.
pub struct RocksBackend {
    db: Arc<DB>,
    /// Serializes read-modify-write operations (state swaps, pool
    /// credits, fingerprint inserts). RocksDB has no native CAS.
    write_lock: Mutex<()>,
}

impl RocksBackend {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_background_jobs(2);
        opts.set_level_compaction_dynamic_level_bytes(true);

        let db = DB::open(&opts, path)
            .map_err(|e| StorageError::BackendError(format!("failed to open RocksDB: {}", e)))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    fn bond_key(id: &BondId) -> Vec<u8> {
        format!("bond:{}", id).into_bytes()
    }

    fn bond_sender_key(context_id: &ContextId, commitment: &SenderCommitment, id: &BondId) -> Vec<u8> {
        format!("bond_sender:{}:{}:{}", context_id, commitment, id).into_bytes()
    }

    fn bond_open_key(id: &BondId) -> Vec<u8> {
        format!("bond_open:{}", id).into_bytes()
    }

    fn reputation_key(commitment: &SenderCommitment) -> Vec<u8> {
        format!("rep:{}", commitment).into_bytes()
    }

    fn attestation_key(id: &AttestationId) -> Vec<u8> {
        format!("att:{}", id).into_bytes()
    }

    fn attestation_bond_key(bond_id: &BondId, id: &AttestationId) -> Vec<u8> {
        format!("att_bond:{}:{}", bond_id, id).into_bytes()
    }

    fn evidence_key(hash: &EvidenceHash) -> Vec<u8> {
        format!("ev:{}", hash).into_bytes()
    }

    fn evidence_expiry_key(expires_at: i64, hash: &EvidenceHash) -> Vec<u8> {
        // Zero-padded so lexicographic order matches time order
        format!("ev_exp:{:020}:{}", expires_at.max(0) as u64, hash).into_bytes()
    }

    fn job_key(id: &AttestationId) -> Vec<u8> {
        format!("job:{}", id).into_bytes()
    }

    fn pool_key(context_id: &ContextId) -> Vec<u8> {
        format!("pool:{}", context_id).into_bytes()
    }

    fn fingerprint_key(fingerprint: &[u8; 32]) -> Vec<u8> {
        format!("fp:{}", hex::encode(fingerprint)).into_bytes()
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>> {
        match self.db.get(key) {
            Ok(Some(data)) => {
                let value = serde_json::from_slice(&data)
                    .map_err(|e| StorageError::SerializationError(e.to_string()))?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::BackendError(format!("RocksDB get: {}", e))),
        }
    }

    fn put_json<T: serde::Serialize>(&self, key: &[u8], value: &T) -> Result<()> {
        let data = serde_json::to_vec(value)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.db
            .put(key, data)
            .map_err(|e| StorageError::BackendError(format!("RocksDB put: {}", e)))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let iter = self
            .db
            .iterator(IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for item in iter {
            let (key, value) =
                item.map_err(|e| StorageError::BackendError(format!("RocksDB scan: {}", e)))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }
}

#[async_trait]
impl StorageBackend for RocksBackend {
    async fn put_bond(&self, bond: &Bond) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let key = Self::bond_key(&bond.id);
        if self
            .db
            .get(&key)
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .is_some()
        {
            return Err(StorageError::AlreadyExists(bond.id.to_string()));
        }

        self.put_json(&key, bond)?;
        self.db
            .put(
                Self::bond_sender_key(&bond.context_id, &bond.sender_commitment, &bond.id),
                bond.id.as_bytes(),
            )
            .map_err(|e| StorageError::BackendError(e.to_string()))?;
        if !bond.state.is_terminal() {
            self.db
                .put(Self::bond_open_key(&bond.id), [])
                .map_err(|e| StorageError::BackendError(e.to_string()))?;
        }
        Ok(())
    }

    async fn get_bond(&self, id: &BondId) -> Result<Option<Bond>> {
        self.get_json(&Self::bond_key(id))
    }

    async fn swap_bond_if(&self, expected: BondState, bond: &Bond) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let stored: Bond = self
            .get_json(&Self::bond_key(&bond.id))?
            .ok_or_else(|| StorageError::NotFound(bond.id.to_string()))?;

        if stored.state != expected {
            return Ok(false);
        }

        self.put_json(&Self::bond_key(&bond.id), bond)?;
        if bond.state.is_terminal() {
            self.db
                .delete(Self::bond_open_key(&bond.id))
                .map_err(|e| StorageError::BackendError(e.to_string()))?;
        }
        Ok(true)
    }

    async fn bonds_for_sender(
        &self,
        context_id: &ContextId,
        commitment: &SenderCommitment,
    ) -> Result<Vec<Bond>> {
        let prefix = format!("bond_sender:{}:{}:", context_id, commitment).into_bytes();
        let mut bonds = Vec::new();
        for (_, value) in self.scan_prefix(&prefix)? {
            if value.len() != 32 {
                continue;
            }
            let mut id_bytes = [0u8; 32];
            id_bytes.copy_from_slice(&value);
            if let Some(bond) = self.get_json::<Bond>(&Self::bond_key(&BondId::from_bytes(id_bytes)))? {
                bonds.push(bond);
            }
        }
        bonds.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
        Ok(bonds)
    }

    async fn unresolved_bonds(&self) -> Result<Vec<Bond>> {
        let mut bonds = Vec::new();
        for (key, _) in self.scan_prefix(b"bond_open:")? {
            let id_hex = String::from_utf8_lossy(&key["bond_open:".len()..]).to_string();
            if let Ok(id) = BondId::from_hex(&id_hex) {
                if let Some(bond) = self.get_json::<Bond>(&Self::bond_key(&id))? {
                    bonds.push(bond);
                }
            }
        }
        Ok(bonds)
    }

    async fn get_reputation(
        &self,
        commitment: &SenderCommitment,
    ) -> Result<Option<ReputationRecord>> {
        self.get_json(&Self::reputation_key(commitment))
    }

    async fn put_reputation(&self, record: &ReputationRecord) -> Result<()> {
        self.put_json(&Self::reputation_key(&record.sender_commitment), record)
    }

    async fn put_attestation(&self, record: &AttestationRecord) -> Result<()> {
        self.put_json(&Self::attestation_key(&record.id), record)?;
        self.db
            .put(
                Self::attestation_bond_key(&record.bond_id, &record.id),
                record.id.as_bytes(),
            )
            .map_err(|e| StorageError::BackendError(e.to_string()))
    }

    async fn get_attestation(&self, id: &AttestationId) -> Result<Option<AttestationRecord>> {
        self.get_json(&Self::attestation_key(id))
    }

    async fn attestations_for_bond(&self, bond_id: &BondId) -> Result<Vec<AttestationRecord>> {
        let prefix = format!("att_bond:{}:", bond_id).into_bytes();
        let mut records = Vec::new();
        for (_, value) in self.scan_prefix(&prefix)? {
            if value.len() != 32 {
                continue;
            }
            let mut id_bytes = [0u8; 32];
            id_bytes.copy_from_slice(&value);
            let id = AttestationId::from_bytes(id_bytes);
            if let Some(record) = self.get_json::<AttestationRecord>(&Self::attestation_key(&id))? {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn prune_attestations(&self, cutoff: i64) -> Result<usize> {
        use veilbond_types::AttestationStatus;

        let _guard = self.write_lock.lock().await;

        let mut pruned = 0;
        for (key, value) in self.scan_prefix(b"att:")? {
            let record: AttestationRecord = serde_json::from_slice(&value)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            let resolved = matches!(
                record.status,
                AttestationStatus::Executed | AttestationStatus::Disputed
            );
            if resolved && record.challenge_end <= cutoff {
                self.db
                    .delete(&key)
                    .map_err(|e| StorageError::BackendError(e.to_string()))?;
                self.db
                    .delete(Self::attestation_bond_key(&record.bond_id, &record.id))
                    .map_err(|e| StorageError::BackendError(e.to_string()))?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    async fn put_evidence(&self, sealed: &SealedEvidence) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let key = Self::evidence_key(&sealed.evidence_hash);
        if self
            .db
            .get(&key)
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .is_some()
        {
            return Err(StorageError::AlreadyExists(sealed.evidence_hash.to_string()));
        }

        self.put_json(&key, sealed)?;
        self.db
            .put(
                Self::evidence_expiry_key(sealed.expires_at, &sealed.evidence_hash),
                sealed.evidence_hash.as_bytes(),
            )
            .map_err(|e| StorageError::BackendError(e.to_string()))
    }

    async fn get_evidence(&self, hash: &EvidenceHash) -> Result<Option<SealedEvidence>> {
        self.get_json(&Self::evidence_key(hash))
    }

    async fn expired_evidence(&self, now: i64) -> Result<Vec<EvidenceHash>> {
        // ';' sorts just above ':', so this bounds every key whose
        // padded expiry is <= now, hash suffix included
        let upper = format!("ev_exp:{:020};", now.max(0) as u64);
        let mut expired = Vec::new();
        for (key, value) in self.scan_prefix(b"ev_exp:")? {
            if key.as_slice() >= upper.as_bytes() {
                break;
            }
            if value.len() == 32 {
                let mut hash_bytes = [0u8; 32];
                hash_bytes.copy_from_slice(&value);
                expired.push(EvidenceHash::from_bytes(hash_bytes));
            }
        }
        Ok(expired)
    }

    async fn delete_evidence(&self, hash: &EvidenceHash) -> Result<()> {
        let sealed: Option<SealedEvidence> = self.get_json(&Self::evidence_key(hash))?;
        if let Some(sealed) = sealed {
            self.db
                .delete(Self::evidence_expiry_key(sealed.expires_at, hash))
                .map_err(|e| StorageError::BackendError(e.to_string()))?;
        }
        self.db
            .delete(Self::evidence_key(hash))
            .map_err(|e| StorageError::BackendError(e.to_string()))
    }

    async fn put_job(&self, job: &SlashJob) -> Result<()> {
        self.put_json(&Self::job_key(&job.attestation_id), job)
    }

    async fn get_job(&self, attestation_id: &AttestationId) -> Result<Option<SlashJob>> {
        self.get_json(&Self::job_key(attestation_id))
    }

    async fn swap_job_if(&self, expected: JobStatus, job: &SlashJob) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let stored: SlashJob = self
            .get_json(&Self::job_key(&job.attestation_id))?
            .ok_or_else(|| StorageError::NotFound(job.attestation_id.to_string()))?;

        if stored.status != expected {
            return Ok(false);
        }

        self.put_json(&Self::job_key(&job.attestation_id), job)?;
        Ok(true)
    }

    async fn due_jobs(&self, now: i64) -> Result<Vec<SlashJob>> {
        let mut due = Vec::new();
        for (_, value) in self.scan_prefix(b"job:")? {
            let job: SlashJob = serde_json::from_slice(&value)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            if job.is_due(now) {
                due.push(job);
            }
        }
        due.sort_by_key(|j| j.next_attempt_at);
        Ok(due)
    }

    async fn credit_safety_pool(
        &self,
        context_id: &ContextId,
        amount: BondAmount,
    ) -> Result<BondAmount> {
        let _guard = self.write_lock.lock().await;

        let key = Self::pool_key(context_id);
        let current: BondAmount = self.get_json(&key)?.unwrap_or(BondAmount::ZERO);
        let updated = current.saturating_add(amount);
        self.put_json(&key, &updated)?;
        Ok(updated)
    }

    async fn safety_pool_balance(&self, context_id: &ContextId) -> Result<BondAmount> {
        Ok(self
            .get_json(&Self::pool_key(context_id))?
            .unwrap_or(BondAmount::ZERO))
    }

    async fn insert_fingerprint(&self, fingerprint: &[u8; 32], expires_at: i64) -> Result<bool> {
        let _guard = self.write_lock.lock().await;

        let key = Self::fingerprint_key(fingerprint);
        if self
            .db
            .get(&key)
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .is_some()
        {
            return Ok(false);
        }
        self.put_json(&key, &expires_at)?;
        Ok(true)
    }

    async fn prune_fingerprints(&self, now: i64) -> Result<usize> {
        let _guard = self.write_lock.lock().await;

        let mut pruned = 0;
        for (key, value) in self.scan_prefix(b"fp:")? {
            let expires_at: i64 = serde_json::from_slice(&value)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            if expires_at <= now {
                self.db
                    .delete(&key)
                    .map_err(|e| StorageError::BackendError(e.to_string()))?;
                pruned += 1;
            }
        }
        Ok(pruned)
    }

    async fn flush(&self) -> Result<()> {
        self.db
            .flush()
            .map_err(|e| StorageError::BackendError(format!("RocksDB flush: {}", e)))
    }

    async fn get_stats(&self) -> Result<StorageStats> {
        let mut stats = StorageStats::default();
        stats.bond_count = self.scan_prefix(b"bond:")?.len();
        stats.unresolved_bond_count = self.scan_prefix(b"bond_open:")?.len();
        stats.reputation_entries = self.scan_prefix(b"rep:")?.len();
        stats.attestation_count = self.scan_prefix(b"att:")?.len();
        stats.evidence_count = self.scan_prefix(b"ev:")?.len();
        stats.fingerprint_entries = self.scan_prefix(b"fp:")?.len();
        stats.pending_jobs = self
            .due_jobs(i64::MAX)
            .await?
            .len();
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> (TempDir, RocksBackend) {
        let dir = TempDir::new().unwrap();
        let backend = RocksBackend::new(dir.path()).unwrap();
        (dir, backend)
    }

    fn bond(id: &[u8]) -> Bond {
        Bond {
            id: BondId::new(id),
            context_id: ContextId::new(b"ctx"),
            sender_commitment: SenderCommitment::from_bytes([1; 32]),
            amount: BondAmount::from_units(5),
            state: BondState::Posted,
            posted_at: 100,
            expires_at: 200,
            frozen_at: None,
            resolved_at: None,
            lock_ref: "lock".to_string(),
            nullifier: veilbond_types::SenderNullifier::from_bytes([0; 32]),
        }
    }

    #[tokio::test]
    async fn test_bond_roundtrip_and_cas() {
        let (_dir, backend) = backend();
        let mut b = bond(b"a");
        backend.put_bond(&b).await.unwrap();

        let stored = backend.get_bond(&b.id).await.unwrap().unwrap();
        assert_eq!(stored.state, BondState::Posted);

        b.state = BondState::Frozen;
        assert!(backend.swap_bond_if(BondState::Posted, &b).await.unwrap());
        assert!(!backend.swap_bond_if(BondState::Posted, &b).await.unwrap());
    }

    #[tokio::test]
    async fn test_unresolved_index_drops_terminal_bonds() {
        let (_dir, backend) = backend();
        let mut b = bond(b"a");
        backend.put_bond(&b).await.unwrap();
        assert_eq!(backend.unresolved_bonds().await.unwrap().len(), 1);

        b.state = BondState::Refunded;
        backend.swap_bond_if(BondState::Posted, &b).await.unwrap();
        assert!(backend.unresolved_bonds().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_jobs_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let job = SlashJob::new(AttestationId::new(b"att"), BondId::new(b"b"), 1_000);

        {
            let backend = RocksBackend::new(dir.path()).unwrap();
            backend.put_job(&job).await.unwrap();
            backend.flush().await.unwrap();
        }

        // A new process sees the same pending job
        let backend = RocksBackend::new(dir.path()).unwrap();
        let due = backend.due_jobs(1_000).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].attestation_id, job.attestation_id);
    }

    #[tokio::test]
    async fn test_evidence_expiry_scan() {
        let (_dir, backend) = backend();
        let sealed = SealedEvidence {
            evidence_hash: EvidenceHash::new(b"e1"),
            ciphertext: vec![1, 2, 3],
            expires_at: 500,
        };
        backend.put_evidence(&sealed).await.unwrap();

        assert!(backend.expired_evidence(499).await.unwrap().is_empty());
        assert_eq!(backend.expired_evidence(500).await.unwrap().len(), 1);

        backend.delete_evidence(&sealed.evidence_hash).await.unwrap();
        assert!(backend.expired_evidence(500).await.unwrap().is_empty());
    }
}
