use std::sync::Arc;
use tracing::debug;
use veilbond_storage::StorageBackend;
use veilbond_types::{BondAmount, BondError, ReputationRecord, Result, SenderCommitment};

/// Per-commitment reputation counters over the shared backend.
/// Records are created lazily on first use and never deleted.
pub struct ReputationStore {
    storage: Arc<dyn StorageBackend>,
}

impl ReputationStore {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    pub async fn get(&self, commitment: &SenderCommitment) -> Result<ReputationRecord> {
        let record = self
            .storage
            .get_reputation(commitment)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;
        Ok(record.unwrap_or_else(|| ReputationRecord::new(*commitment)))
    }

    pub async fn record_posted(&self, commitment: &SenderCommitment) -> Result<()> {
        let mut record = self.get(commitment).await?;
        record.posted_count += 1;
        self.put(&record).await
    }

    pub async fn record_engagement(&self, commitment: &SenderCommitment) -> Result<()> {
        let mut record = self.get(commitment).await?;
        record.engaged_count += 1;
        self.put(&record).await
    }

    pub async fn record_slash(
        &self,
        commitment: &SenderCommitment,
        amount: BondAmount,
        now: i64,
    ) -> Result<()> {
        let mut record = self.get(commitment).await?;
        record.slashed_count += 1;
        record.last_slash_at = Some(now);
        record.total_slashed = record.total_slashed.saturating_add(amount);
        debug!(
            commitment = %commitment,
            slashed_count = record.slashed_count,
            "reputation penalty recorded"
        );
        self.put(&record).await
    }

    async fn put(&self, record: &ReputationRecord) -> Result<()> {
        self.storage
            .put_reputation(record)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))
    }
}

/// Dynamic bond pricing. Monotonic and multiplicative: a clean record
/// pays the base minimum, each recorded slash multiplies it, capped so
/// the formula itself cannot grief a sender into absurd requirements.
pub fn required_bond_amount(
    base_minimum: BondAmount,
    reputation: &ReputationRecord,
    ceiling_multiplier: u64,
) -> BondAmount {
    let multiplier = (1 + reputation.slashed_count).min(ceiling_multiplier.max(1));
    base_minimum.saturating_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilbond_storage::MemoryBackend;

    fn rep_with_slashes(slashed_count: u64) -> ReputationRecord {
        let mut rep = ReputationRecord::new(SenderCommitment::from_bytes([1; 32]));
        rep.slashed_count = slashed_count;
        rep
    }

    #[test]
    fn test_clean_record_pays_base() {
        let base = BondAmount::from_units(10);
        assert_eq!(required_bond_amount(base, &rep_with_slashes(0), 10), base);
    }

    #[test]
    fn test_two_slashes_triple_the_price() {
        let base = BondAmount::from_units(10);
        assert_eq!(
            required_bond_amount(base, &rep_with_slashes(2), 10),
            BondAmount::from_units(30)
        );
    }

    #[test]
    fn test_pricing_is_monotonic() {
        let base = BondAmount::from_units(7);
        let mut prev = BondAmount::ZERO;
        for slashes in 0..20 {
            let price = required_bond_amount(base, &rep_with_slashes(slashes), 10);
            assert!(price >= prev);
            prev = price;
        }
    }

    #[test]
    fn test_ceiling_caps_the_multiplier() {
        let base = BondAmount::from_units(10);
        assert_eq!(
            required_bond_amount(base, &rep_with_slashes(100), 5),
            BondAmount::from_units(50)
        );
    }

    #[tokio::test]
    async fn test_lazy_creation_and_updates() {
        let store = ReputationStore::new(Arc::new(MemoryBackend::new()));
        let commitment = SenderCommitment::from_bytes([2; 32]);

        let fresh = store.get(&commitment).await.unwrap();
        assert_eq!(fresh.posted_count, 0);

        store.record_posted(&commitment).await.unwrap();
        store
            .record_slash(&commitment, BondAmount::from_units(5), 1_000)
            .await
            .unwrap();

        let rep = store.get(&commitment).await.unwrap();
        assert_eq!(rep.posted_count, 1);
        assert_eq!(rep.slashed_count, 1);
        assert_eq!(rep.last_slash_at, Some(1_000));
        assert_eq!(rep.total_slashed, BondAmount::from_units(5));
    }
}
