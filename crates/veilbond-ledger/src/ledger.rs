use crate::reputation::{required_bond_amount, ReputationStore};
use crate::settlement::{ReleaseDestination, SettlementLedger};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use veilbond_storage::StorageBackend;
use veilbond_types::{
    Bond, BondAmount, BondError, BondId, BondState, ContextId, ContextPolicy, EvidenceHash,
    ExpiryDefault, Result, SenderCommitment, SenderNullifier,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Cap on the reputation pricing multiplier
    pub pricing_ceiling_multiplier: u64,

    /// What happens to bonds whose TTL elapses unresolved
    pub expiry_default: ExpiryDefault,

    /// Timeout applied to every settlement call, in milliseconds
    pub settlement_timeout_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            pricing_ceiling_multiplier: 10,
            expiry_default: ExpiryDefault::Refund,
            settlement_timeout_ms: 5_000,
        }
    }
}

/// Owns the bond state machine. Every transition goes through a
/// compare-and-swap on the stored state, so races on the same bond
/// resolve to exactly one winner without locking the whole ledger.
pub struct BondLedger {
    storage: Arc<dyn StorageBackend>,
    settlement: Arc<dyn SettlementLedger>,
    reputation: Arc<ReputationStore>,
    config: LedgerConfig,
}

impl BondLedger {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        settlement: Arc<dyn SettlementLedger>,
        reputation: Arc<ReputationStore>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            storage,
            settlement,
            reputation,
            config,
        }
    }

    pub fn reputation(&self) -> &ReputationStore {
        &self.reputation
    }

    /// Policy attached to a context, as the settlement layer reports it.
    pub async fn context_policy(&self, context_id: &ContextId) -> Result<ContextPolicy> {
        self.settle(self.settlement.query_policy(context_id)).await
    }

    /// Bound a settlement call; the settlement layer gates fund
    /// movement, so an unreachable settlement fails closed.
    async fn settle<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let timeout = Duration::from_millis(self.config.settlement_timeout_ms);
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(BondError::BackingStoreUnavailable(e.to_string())),
            Err(_) => Err(BondError::BackingStoreUnavailable(
                "settlement call timed out".to_string(),
            )),
        }
    }

    /// Post a new bond. Fails with `PolicyViolation` when the amount is
    /// below the reputation-priced minimum for this sender.
    pub async fn post_bond(
        &self,
        context_id: &ContextId,
        sender_commitment: &SenderCommitment,
        nullifier: SenderNullifier,
        amount: BondAmount,
        ttl_secs: i64,
        now: i64,
    ) -> Result<BondId> {
        if ttl_secs <= 0 {
            return Err(BondError::InvalidParameter(
                "bond ttl must be positive".to_string(),
            ));
        }

        let policy = self
            .settle(self.settlement.query_policy(context_id))
            .await?;

        if policy.requires_bond {
            let reputation = self.reputation.get(sender_commitment).await?;
            let required = required_bond_amount(
                policy.base_minimum,
                &reputation,
                self.config.pricing_ceiling_multiplier,
            );
            if amount < required {
                return Err(BondError::PolicyViolation {
                    offered: amount,
                    required,
                });
            }
        }

        let lock_ref = self
            .settle(
                self.settlement
                    .lock_funds(context_id, sender_commitment, amount),
            )
            .await?;

        // Lock refs are unique per escrow, which makes the id unique
        let mut id_material = Vec::new();
        id_material.extend_from_slice(context_id.as_bytes());
        id_material.extend_from_slice(sender_commitment.as_bytes());
        id_material.extend_from_slice(lock_ref.as_bytes());
        id_material.extend_from_slice(&now.to_le_bytes());
        let bond_id = BondId::new(&id_material);

        let bond = Bond {
            id: bond_id,
            context_id: *context_id,
            sender_commitment: *sender_commitment,
            amount,
            state: BondState::Posted,
            posted_at: now,
            expires_at: now + ttl_secs,
            frozen_at: None,
            resolved_at: None,
            lock_ref,
            nullifier,
        };

        self.storage
            .put_bond(&bond)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;
        self.reputation.record_posted(sender_commitment).await?;

        info!(
            bond_id = %bond_id,
            context_id = %context_id,
            sender = %sender_commitment,
            amount = amount.to_units(),
            expires_at = bond.expires_at,
            "💰 Bond posted"
        );
        Ok(bond_id)
    }

    /// True iff a non-terminal, unexpired bond exists for the sender in
    /// this context. Gates forwarding, so backend errors fail closed.
    pub async fn has_active_bond(
        &self,
        context_id: &ContextId,
        sender_commitment: &SenderCommitment,
        now: i64,
    ) -> Result<bool> {
        let bonds = self
            .storage
            .bonds_for_sender(context_id, sender_commitment)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;
        Ok(bonds.iter().any(|b| b.is_active(now)))
    }

    /// Most recent active bond for a sender, if any.
    pub async fn active_bond(
        &self,
        context_id: &ContextId,
        sender_commitment: &SenderCommitment,
        now: i64,
    ) -> Result<Option<Bond>> {
        let bonds = self
            .storage
            .bonds_for_sender(context_id, sender_commitment)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;
        Ok(bonds.into_iter().find(|b| b.is_active(now)))
    }

    pub async fn get_bond(&self, bond_id: &BondId) -> Result<Bond> {
        self.storage
            .get_bond(bond_id)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?
            .ok_or_else(|| BondError::NotFound(format!("bond {}", bond_id)))
    }

    /// Return escrow to the sender. Idempotent: refunding a bond that
    /// is already refunded is a no-op success.
    pub async fn refund_bond(&self, bond_id: &BondId, now: i64) -> Result<()> {
        let bond = self.get_bond(bond_id).await?;

        match bond.state {
            BondState::Refunded => {
                debug!(bond_id = %bond_id, "refund of already-refunded bond, no-op");
                return Ok(());
            }
            BondState::Posted | BondState::Frozen | BondState::Expired => {}
            BondState::Slashed => {
                return Err(BondError::InvalidTransition {
                    bond_id: *bond_id,
                    from: bond.state,
                    attempted: BondState::Refunded,
                });
            }
        }

        let mut updated = bond.clone();
        updated.state = BondState::Refunded;
        updated.resolved_at = Some(now);

        let won = self
            .storage
            .swap_bond_if(bond.state, &updated)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;

        if !won {
            let current = self.get_bond(bond_id).await?;
            return match current.state {
                BondState::Refunded => Ok(()),
                _ => Err(BondError::AlreadyResolved(*bond_id)),
            };
        }

        if let Err(e) = self
            .settle(
                self.settlement
                    .release_funds(&bond.lock_ref, ReleaseDestination::Sender),
            )
            .await
        {
            // State already moved; surface the payout failure loudly
            error!(bond_id = %bond_id, error = %e, "refund payout failed");
            return Err(e);
        }

        info!(
            bond_id = %bond_id,
            amount = bond.amount.to_units(),
            from = %bond.state,
            "💸 Bond refunded"
        );
        Ok(())
    }

    /// Freeze a posted bond pending the challenge window.
    pub async fn freeze_bond(&self, bond_id: &BondId, now: i64) -> Result<()> {
        let bond = self.get_bond(bond_id).await?;

        match bond.state {
            BondState::Posted => {}
            BondState::Frozen => return Err(BondError::AlreadyResolved(*bond_id)),
            other => {
                return Err(BondError::InvalidTransition {
                    bond_id: *bond_id,
                    from: other,
                    attempted: BondState::Frozen,
                });
            }
        }

        let mut updated = bond.clone();
        updated.state = BondState::Frozen;
        updated.frozen_at = Some(now);

        let won = self
            .storage
            .swap_bond_if(BondState::Posted, &updated)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;

        if !won {
            return Err(BondError::AlreadyResolved(*bond_id));
        }

        info!(bond_id = %bond_id, "🧊 Bond frozen pending challenge window");
        Ok(())
    }

    /// Forfeit a frozen bond to the context's safety pool. Idempotent:
    /// slashing an already-slashed bond is a no-op success, which is
    /// what makes at-least-once job delivery safe.
    pub async fn slash_bond(
        &self,
        bond_id: &BondId,
        evidence_hash: &EvidenceHash,
        nullifier: &SenderNullifier,
        now: i64,
    ) -> Result<()> {
        let bond = self.get_bond(bond_id).await?;

        match bond.state {
            BondState::Slashed => {
                debug!(bond_id = %bond_id, "slash of already-slashed bond, no-op");
                return Ok(());
            }
            BondState::Frozen => {}
            other => {
                return Err(BondError::InvalidTransition {
                    bond_id: *bond_id,
                    from: other,
                    attempted: BondState::Slashed,
                });
            }
        }

        let mut updated = bond.clone();
        updated.state = BondState::Slashed;
        updated.resolved_at = Some(now);

        let won = self
            .storage
            .swap_bond_if(BondState::Frozen, &updated)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;

        if !won {
            let current = self.get_bond(bond_id).await?;
            return match current.state {
                BondState::Slashed => Ok(()),
                _ => Err(BondError::AlreadyResolved(*bond_id)),
            };
        }

        let pool_balance = self
            .storage
            .credit_safety_pool(&bond.context_id, bond.amount)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;
        self.reputation
            .record_slash(&bond.sender_commitment, bond.amount, now)
            .await?;

        // The nullifier is the only identity-shaped thing logged here:
        // it links repeat offenses within this context and nothing else
        warn!(
            bond_id = %bond_id,
            context_id = %bond.context_id,
            evidence = %evidence_hash,
            nullifier = %nullifier,
            amount = bond.amount.to_units(),
            pool_balance = pool_balance.to_units(),
            "⚡ Bond slashed"
        );

        self.settle(
            self.settlement
                .release_funds(&bond.lock_ref, ReleaseDestination::SafetyPool),
        )
        .await?;
        Ok(())
    }

    /// Sweep bonds past their TTL with no terminal resolution. Absent
    /// recipient engagement is not evidence of abuse, so the default
    /// resolves toward the sender.
    pub async fn expire_unresolved_bonds(&self, now: i64) -> Result<usize> {
        let unresolved = self
            .storage
            .unresolved_bonds()
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;

        let mut expired = 0;
        for bond in unresolved {
            if now < bond.expires_at {
                continue;
            }

            let mut updated = bond.clone();
            updated.state = BondState::Expired;
            updated.resolved_at = Some(now);

            let won = self
                .storage
                .swap_bond_if(bond.state, &updated)
                .await
                .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))?;
            if !won {
                // Another transition won while we swept; leave it be
                continue;
            }
            expired += 1;

            info!(
                bond_id = %bond.id,
                from = %bond.state,
                "⏳ Bond expired unresolved"
            );

            if self.config.expiry_default == ExpiryDefault::Refund {
                if let Err(e) = self.refund_bond(&bond.id, now).await {
                    error!(bond_id = %bond.id, error = %e, "expiry refund failed");
                }
            }
        }
        Ok(expired)
    }

    pub async fn safety_pool_balance(&self, context_id: &ContextId) -> Result<BondAmount> {
        self.storage
            .safety_pool_balance(context_id)
            .await
            .map_err(|e| BondError::BackingStoreUnavailable(e.to_string()))
    }
}
