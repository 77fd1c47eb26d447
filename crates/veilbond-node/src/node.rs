use crate::config::{decode_key_hex, NodeConfig};
use crate::metrics::Metrics;
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use veilbond_attest::SlashScheduler;
use veilbond_crypto::{EvidenceCipher, ReceiptSigner};
use veilbond_ledger::{BondLedger, MemorySettlement, ReputationStore, StaticAuthority};
use veilbond_relay::{
    EngagementKind, EvidenceStore, ForwardResult, InboundMessage, NullDelivery, RateLimiter,
    ReceiptIssuer, Relay,
};
use veilbond_storage::{MemoryBackend, StorageBackend, StorageStats};
use veilbond_types::{
    AttestationId, AttestationRecord, Bond, BondAmount, BondId, ContextId, ContextPolicy,
    EvidenceHash, ReputationRecord, SenderCommitment, SenderNullifier,
};

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The assembled engine: one storage backend injected into every
/// component, collaborator adapters, and the background loops that
/// keep sweeps and scheduled slashes running.
#[derive(Clone)]
pub struct VeilbondNode {
    config: NodeConfig,
    storage: Arc<dyn StorageBackend>,
    settlement: Arc<MemorySettlement>,
    authority: Arc<StaticAuthority>,
    ledger: Arc<BondLedger>,
    scheduler: Arc<SlashScheduler>,
    relay: Arc<Relay>,
    pub metrics: Metrics,
}

impl VeilbondNode {
    pub async fn new(config: NodeConfig) -> Result<Self> {
        let storage = Self::open_storage(&config)?;
        let metrics = Metrics::new();

        let settlement = Arc::new(MemorySettlement::new());
        let authority = Arc::new(StaticAuthority::new());
        for entry in &config.contexts {
            let context_id = ContextId::new(entry.name.as_bytes());
            settlement
                .set_policy(
                    context_id,
                    ContextPolicy {
                        requires_bond: entry.requires_bond,
                        base_minimum: BondAmount::from_units(entry.base_minimum_units),
                        ttl_secs: entry.ttl_secs,
                        challenge_window_secs: entry.challenge_window_secs,
                    },
                )
                .await;
            for guardian in &entry.guardians {
                authority.grant(context_id, guardian.clone()).await;
            }
            info!(
                context = entry.name.as_str(),
                context_id = %context_id,
                guardians = entry.guardians.len(),
                "⚙️ Context seeded"
            );
        }

        let reputation = Arc::new(ReputationStore::new(storage.clone()));
        let ledger = Arc::new(BondLedger::new(
            storage.clone(),
            settlement.clone(),
            reputation,
            config.ledger.clone(),
        ));

        let mut scheduler = SlashScheduler::new(
            storage.clone(),
            ledger.clone(),
            authority.clone(),
            config.attest.clone(),
        );
        scheduler.set_metrics(
            Arc::new(metrics.attestations_filed.clone()),
            Arc::new(metrics.slashes_executed.clone()),
            Arc::new(metrics.slashes_failed.clone()),
            Arc::new(metrics.disputes_upheld.clone()),
        );
        let scheduler = Arc::new(scheduler);

        let evidence_key = match &config.secrets.evidence_key_hex {
            Some(hex) => decode_key_hex(hex).context("invalid evidence key")?,
            None => {
                warn!("no evidence key configured, using an ephemeral one");
                EvidenceCipher::generate_key()
            }
        };
        let receipt_signer = match &config.secrets.receipt_seed_hex {
            Some(hex) => ReceiptSigner::from_seed(
                decode_key_hex(hex).context("invalid receipt seed")?,
            ),
            None => {
                warn!("no receipt seed configured, using an ephemeral signer");
                ReceiptSigner::generate()
            }
        };

        let mut relay = Relay::new(
            ledger.clone(),
            storage.clone(),
            RateLimiter::new(config.rate_limit.clone()),
            EvidenceStore::new(
                storage.clone(),
                EvidenceCipher::new(evidence_key),
                config.evidence.clone(),
            ),
            ReceiptIssuer::new(receipt_signer),
            Arc::new(NullDelivery),
            config.relay.clone(),
        );
        relay.set_metrics(
            Arc::new(metrics.messages_forwarded.clone()),
            Arc::new(metrics.messages_rejected.clone()),
        );
        let relay = Arc::new(relay);

        info!(
            name = config.node.name.as_str(),
            backend = config.storage.backend.as_str(),
            "🚀 Node assembled"
        );

        Ok(Self {
            config,
            storage,
            settlement,
            authority,
            ledger,
            scheduler,
            relay,
            metrics,
        })
    }

    fn open_storage(config: &NodeConfig) -> Result<Arc<dyn StorageBackend>> {
        match config.storage.backend.as_str() {
            "memory" => Ok(Arc::new(MemoryBackend::new())),
            #[cfg(feature = "rocksdb")]
            "rocksdb" => {
                let path = config.node.data_dir.join("veilbond.db");
                Ok(Arc::new(veilbond_storage::RocksBackend::new(path)?))
            }
            #[cfg(not(feature = "rocksdb"))]
            "rocksdb" => bail!("built without the rocksdb feature"),
            other => bail!("unknown storage backend: {}", other),
        }
    }

    /// Spawn the poll and sweep loops. Dropping the handles stops
    /// nothing by itself; abort them on shutdown.
    pub fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let scheduler = self.scheduler.clone();
        let poll = Duration::from_secs(self.config.sweeps.job_poll_interval_secs);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.run_due_jobs(now_ts()).await {
                    error!(error = %e, "slash job poll failed");
                }
            }
        }));

        let ledger = self.ledger.clone();
        let bonds_expired = self.metrics.bonds_expired.clone();
        let expiry = Duration::from_secs(self.config.sweeps.bond_expiry_interval_secs);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(expiry);
            loop {
                ticker.tick().await;
                match ledger.expire_unresolved_bonds(now_ts()).await {
                    Ok(count) => bonds_expired.inc_by(count as u64),
                    Err(e) => error!(error = %e, "bond expiry sweep failed"),
                }
            }
        }));

        let relay = self.relay.clone();
        let scheduler = self.scheduler.clone();
        let storage = self.storage.clone();
        let evidence_swept = self.metrics.evidence_swept.clone();
        let retention = Duration::from_secs(self.config.sweeps.retention_sweep_interval_secs);
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(retention);
            loop {
                ticker.tick().await;
                let now = now_ts();
                match relay.evidence().sweep_expired(now).await {
                    Ok(count) => evidence_swept.inc_by(count as u64),
                    Err(e) => error!(error = %e, "evidence sweep failed"),
                }
                if let Err(e) = storage.prune_fingerprints(now).await {
                    error!(error = %e, "fingerprint prune failed");
                }
                if let Err(e) = scheduler.prune_resolved(now).await {
                    error!(error = %e, "attestation prune failed");
                }
                relay.rate_limiter().prune_idle(now).await;
            }
        }));

        handles
    }

    // ---- public surface, time injected here ----

    pub async fn post_bond(
        &self,
        context_id: &ContextId,
        sender_commitment: &SenderCommitment,
        nullifier: SenderNullifier,
        amount: BondAmount,
        ttl_secs: i64,
    ) -> veilbond_types::Result<BondId> {
        self.ledger
            .post_bond(context_id, sender_commitment, nullifier, amount, ttl_secs, now_ts())
            .await
    }

    pub async fn verify_and_forward(
        &self,
        context_id: &ContextId,
        sender_commitment: &SenderCommitment,
        message: InboundMessage,
    ) -> veilbond_types::Result<ForwardResult> {
        self.relay
            .verify_and_forward(context_id, sender_commitment, message, now_ts())
            .await
    }

    pub async fn handle_engagement(
        &self,
        context_id: &ContextId,
        sender_commitment: &SenderCommitment,
        kind: EngagementKind,
    ) -> veilbond_types::Result<bool> {
        self.relay
            .handle_engagement(context_id, sender_commitment, kind, now_ts())
            .await
    }

    pub async fn file_attestation(
        &self,
        context_id: &ContextId,
        sender_commitment: &SenderCommitment,
        evidence_hash: EvidenceHash,
        attestor: &str,
    ) -> veilbond_types::Result<AttestationId> {
        self.scheduler
            .file_attestation(context_id, sender_commitment, evidence_hash, attestor, now_ts())
            .await
    }

    pub async fn dispute_attestation(
        &self,
        attestation_id: &AttestationId,
        counter_evidence: EvidenceHash,
    ) -> veilbond_types::Result<()> {
        self.scheduler
            .dispute_attestation(attestation_id, counter_evidence, now_ts())
            .await
    }

    pub async fn refund_bond(&self, bond_id: &BondId) -> veilbond_types::Result<()> {
        self.ledger.refund_bond(bond_id, now_ts()).await
    }

    pub async fn get_bond(&self, bond_id: &BondId) -> veilbond_types::Result<Bond> {
        self.ledger.get_bond(bond_id).await
    }

    pub async fn get_attestation(
        &self,
        id: &AttestationId,
    ) -> veilbond_types::Result<AttestationRecord> {
        self.scheduler.get_attestation(id).await
    }

    pub async fn get_reputation(
        &self,
        commitment: &SenderCommitment,
    ) -> veilbond_types::Result<ReputationRecord> {
        self.ledger.reputation().get(commitment).await
    }

    pub async fn safety_pool_balance(
        &self,
        context_id: &ContextId,
    ) -> veilbond_types::Result<BondAmount> {
        self.ledger.safety_pool_balance(context_id).await
    }

    pub async fn get_stats(&self) -> veilbond_types::Result<StorageStats> {
        self.storage
            .get_stats()
            .await
            .map_err(|e| veilbond_types::BondError::BackingStoreUnavailable(e.to_string()))
    }

    pub fn settlement(&self) -> &Arc<MemorySettlement> {
        &self.settlement
    }

    pub fn authority(&self) -> &Arc<StaticAuthority> {
        &self.authority
    }

    pub fn api_config(&self) -> &crate::config::ApiConfig {
        &self.config.api
    }
}
