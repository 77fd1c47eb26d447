use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use veilbond_crypto::EvidenceCipher;
use veilbond_storage::{StorageBackend, StorageError};
use veilbond_types::{BondError, EvidenceHash, EvidenceRecord, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceConfig {
    /// How long evidence is kept before the sweep removes it
    pub retention_secs: i64,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            retention_secs: 30 * 24 * 3_600,
        }
    }
}

/// Content-fingerprinted, time-bounded evidence storage. Records are
/// encrypted before they reach the backend and immutable once written;
/// the sweep is the only thing that ever removes one.
pub struct EvidenceStore {
    storage: Arc<dyn StorageBackend>,
    cipher: EvidenceCipher,
    config: EvidenceConfig,
}

impl EvidenceStore {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        cipher: EvidenceCipher,
        config: EvidenceConfig,
    ) -> Self {
        Self {
            storage,
            cipher,
            config,
        }
    }

    /// Seal and store a record. Write-once per hash.
    pub async fn record(&self, record: &EvidenceRecord) -> Result<()> {
        let expires_at = record.recorded_at + self.config.retention_secs;
        let sealed = self
            .cipher
            .seal(record, expires_at)
            .map_err(|e| BondError::Serialization(e.to_string()))?;

        match self.storage.put_evidence(&sealed).await {
            Ok(()) => {
                debug!(
                    evidence = %record.evidence_hash,
                    expires_at,
                    "evidence recorded"
                );
                Ok(())
            }
            Err(StorageError::AlreadyExists(hash)) => Err(BondError::InvalidParameter(format!(
                "evidence {} already recorded",
                hash
            ))),
            Err(e) => Err(BondError::BackingStoreUnavailable(e.to_string())),
        }
    }

    pub async fn fetch(&self, hash: &EvidenceHash) -> Result<EvidenceRecord> {
        let sealed = self
            .storage
            .get_evidence(hash)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?
            .ok_or_else(|| BondError::NotFound(format!("evidence {}", hash)))?;

        self.cipher
            .open(&sealed)
            .map_err(|e| BondError::Serialization(e.to_string()))
    }

    /// Remove records past their retention expiry; returns how many.
    pub async fn sweep_expired(&self, now: i64) -> Result<usize> {
        let expired = self
            .storage
            .expired_evidence(now)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;

        let count = expired.len();
        for hash in expired {
            self.storage
                .delete_evidence(&hash)
                .await
                .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;
        }

        if count > 0 {
            info!(removed = count, "🧹 Expired evidence swept");
        }
        Ok(count)
    }
}
