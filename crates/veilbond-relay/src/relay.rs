use crate::delivery::DeliveryChannel;
use crate::evidence::EvidenceStore;
use crate::rate_limit::RateLimiter;
use crate::receipt::{Receipt, ReceiptIssuer, ReceiptRole};
use prometheus::IntCounter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use veilbond_crypto::fingerprint_content;
use veilbond_ledger::BondLedger;
use veilbond_storage::StorageBackend;
use veilbond_types::{
    BondError, BondState, ContextId, EvidenceHash, EvidenceRecord, ReputationRecord, Result,
    SenderCommitment,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Messages older than this are rejected outright
    pub freshness_window_secs: i64,

    /// Timeout for the delivery channel, in milliseconds
    pub delivery_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            freshness_window_secs: 300,
            delivery_timeout_ms: 10_000,
        }
    }
}

/// What a sender hands the relay.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub content: Vec<u8>,
    pub sent_at: i64,
    /// Signature the transport produced over the payload
    pub transport_signature: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ForwardResult {
    pub evidence_hash: EvidenceHash,
    pub sender_receipt: Receipt,
    pub recipient_receipt: Receipt,
}

/// Healthy-interaction signals that release the sender's bond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngagementKind {
    Reply,
    Accept,
    PositiveFeedback,
}

/// Entry point for the outside world: bond gate, rate limit,
/// freshness/replay check, evidence capture, delivery, receipts.
pub struct Relay {
    ledger: Arc<BondLedger>,
    storage: Arc<dyn StorageBackend>,
    rate_limiter: RateLimiter,
    evidence: EvidenceStore,
    issuer: ReceiptIssuer,
    delivery: Arc<dyn DeliveryChannel>,
    config: RelayConfig,
    // Metrics counters - wired by the node when metrics are enabled
    pub messages_forwarded: Option<Arc<IntCounter>>,
    pub messages_rejected: Option<Arc<IntCounter>>,
}

impl Relay {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: Arc<BondLedger>,
        storage: Arc<dyn StorageBackend>,
        rate_limiter: RateLimiter,
        evidence: EvidenceStore,
        issuer: ReceiptIssuer,
        delivery: Arc<dyn DeliveryChannel>,
        config: RelayConfig,
    ) -> Self {
        Self {
            ledger,
            storage,
            rate_limiter,
            evidence,
            issuer,
            delivery,
            config,
            messages_forwarded: None,
            messages_rejected: None,
        }
    }

    pub fn set_metrics(
        &mut self,
        messages_forwarded: Arc<IntCounter>,
        messages_rejected: Arc<IntCounter>,
    ) {
        self.messages_forwarded = Some(messages_forwarded);
        self.messages_rejected = Some(messages_rejected);
    }

    pub fn evidence(&self) -> &EvidenceStore {
        &self.evidence
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    fn reject(&self, err: BondError) -> BondError {
        if let Some(ref counter) = self.messages_rejected {
            counter.inc();
        }
        err
    }

    /// Verify the sender may contact this context, then forward and
    /// issue receipts to both parties.
    pub async fn verify_and_forward(
        &self,
        context_id: &ContextId,
        sender_commitment: &SenderCommitment,
        message: InboundMessage,
        now: i64,
    ) -> Result<ForwardResult> {
        // Bond gate. Verification reads fail closed: an unreachable
        // store must not let unbonded strangers through.
        let policy = self
            .ledger
            .context_policy(context_id)
            .await
            .map_err(|e| self.reject(e))?;
        if policy.requires_bond {
            let active = self
                .ledger
                .has_active_bond(context_id, sender_commitment, now)
                .await
                .map_err(|e| self.reject(e))?;
            if !active {
                return Err(self.reject(BondError::NotFound(format!(
                    "no active bond for sender {} in context {}",
                    sender_commitment, context_id
                ))));
            }
        }

        // Rate limit. Reputation feeding it fails open: this guard is
        // not worth an outage.
        let reputation = match self.ledger.reputation().get(sender_commitment).await {
            Ok(rep) => rep,
            Err(e) => {
                warn!(
                    commitment = %sender_commitment,
                    error = %e,
                    "reputation lookup failed, rate limiting with defaults"
                );
                ReputationRecord::new(*sender_commitment)
            }
        };
        let decision = self
            .rate_limiter
            .check_and_consume(sender_commitment, &reputation, now)
            .await;
        if !decision.allowed {
            return Err(self.reject(BondError::RateLimited {
                retry_after_secs: decision.retry_after_secs,
            }));
        }

        // Freshness and replay
        if message.sent_at < now - self.config.freshness_window_secs {
            return Err(self.reject(BondError::InvalidParameter(
                "message older than freshness window".to_string(),
            )));
        }
        let fingerprint = fingerprint_content(&message.content);
        let fresh = self
            .storage
            .insert_fingerprint(&fingerprint, now + self.config.freshness_window_secs)
            .await
            .map_err(|e| self.reject(BondError::BackingStoreUnavailable(e.to_string())))?;
        if !fresh {
            return Err(self.reject(BondError::InvalidParameter(
                "message content already processed".to_string(),
            )));
        }

        // Evidence before delivery: if abuse is reported later there
        // must be no gap
        let mut hash_material = Vec::with_capacity(32 + 32 + 32 + 8);
        hash_material.extend_from_slice(&fingerprint);
        hash_material.extend_from_slice(context_id.as_bytes());
        hash_material.extend_from_slice(sender_commitment.as_bytes());
        hash_material.extend_from_slice(&now.to_le_bytes());
        let evidence_hash = EvidenceHash::new(&hash_material);

        let record = EvidenceRecord {
            evidence_hash,
            content_fingerprint: fingerprint,
            transport_signature: message.transport_signature.clone(),
            sender_commitment: *sender_commitment,
            context_id: *context_id,
            recorded_at: now,
        };
        self.evidence.record(&record).await.map_err(|e| self.reject(e))?;

        // Delivery is a pass-through with a bound, never an open wait
        let timeout = Duration::from_millis(self.config.delivery_timeout_ms);
        match tokio::time::timeout(
            timeout,
            self.delivery.deliver(context_id, &message.content),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(self.reject(BondError::BackingStoreUnavailable(format!(
                    "delivery failed: {}",
                    e
                ))));
            }
            Err(_) => {
                return Err(self.reject(BondError::BackingStoreUnavailable(
                    "delivery timed out".to_string(),
                )));
            }
        }

        let sender_receipt = self.issuer.issue(
            ReceiptRole::Sender,
            context_id,
            &fingerprint,
            &evidence_hash,
            now,
        );
        let recipient_receipt = self.issuer.issue(
            ReceiptRole::Recipient,
            context_id,
            &fingerprint,
            &evidence_hash,
            now,
        );

        if let Some(ref counter) = self.messages_forwarded {
            counter.inc();
        }
        info!(
            context_id = %context_id,
            sender = %sender_commitment,
            evidence = %evidence_hash,
            "📨 Message forwarded"
        );

        Ok(ForwardResult {
            evidence_hash,
            sender_receipt,
            recipient_receipt,
        })
    }

    /// Healthy interaction releases the sender's bond. Returns whether
    /// a refund actually happened.
    pub async fn handle_engagement(
        &self,
        context_id: &ContextId,
        sender_commitment: &SenderCommitment,
        kind: EngagementKind,
        now: i64,
    ) -> Result<bool> {
        let bond = match self
            .ledger
            .active_bond(context_id, sender_commitment, now)
            .await?
        {
            Some(bond) => bond,
            None => return Ok(false),
        };

        // Frozen bonds wait out their challenge window; engagement
        // only releases untouched ones
        if bond.state != BondState::Posted {
            return Ok(false);
        }

        self.ledger.refund_bond(&bond.id, now).await?;
        self.ledger
            .reputation()
            .record_engagement(sender_commitment)
            .await?;

        info!(
            bond_id = %bond.id,
            context_id = %context_id,
            kind = ?kind,
            "🤝 Engagement refund issued"
        );
        Ok(true)
    }
}
