use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use veilbond_types::{BondAmount, ContextId, ContextPolicy, SenderCommitment};

/// Where released escrow goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseDestination {
    /// Back to the posting sender
    Sender,

    /// Forfeited into the context's safety pool
    SafetyPool,
}

/// Narrow interface to the settlement collaborator. The engine asks it
/// to escrow and move funds and to read context policy; it owns none
/// of that machinery and assumes nothing about the backing technology.
#[async_trait]
pub trait SettlementLedger: Send + Sync {
    /// Escrow `amount` on behalf of the committed sender. Returns an
    /// opaque lock reference used for the eventual release.
    async fn lock_funds(
        &self,
        context_id: &ContextId,
        owner: &SenderCommitment,
        amount: BondAmount,
    ) -> Result<String>;

    async fn release_funds(&self, lock_ref: &str, destination: ReleaseDestination) -> Result<()>;

    async fn query_policy(&self, context_id: &ContextId) -> Result<ContextPolicy>;
}

/// Authorization / proof collaborator. `certify_witness` is a
/// pass-through for systems that attach validity proofs to
/// transitions; the engine's own logic never inspects the proof.
#[async_trait]
pub trait AuthorityProvider: Send + Sync {
    async fn authorize_admin(&self, context_id: &ContextId, actor: &str) -> Result<bool>;

    async fn certify_witness(&self, circuit: &str, witness: &[u8]) -> Result<Vec<u8>>;
}

/// In-process settlement adapter for tests and single-node deployments.
pub struct MemorySettlement {
    policies: Arc<RwLock<HashMap<ContextId, ContextPolicy>>>,
    locks: Arc<RwLock<HashMap<String, BondAmount>>>,
    next_lock: Arc<RwLock<u64>>,
}

impl MemorySettlement {
    pub fn new() -> Self {
        Self {
            policies: Arc::new(RwLock::new(HashMap::new())),
            locks: Arc::new(RwLock::new(HashMap::new())),
            next_lock: Arc::new(RwLock::new(0)),
        }
    }

    pub async fn set_policy(&self, context_id: ContextId, policy: ContextPolicy) {
        let mut policies = self.policies.write().await;
        policies.insert(context_id, policy);
    }

    pub async fn locked_count(&self) -> usize {
        self.locks.read().await.len()
    }
}

impl Default for MemorySettlement {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SettlementLedger for MemorySettlement {
    async fn lock_funds(
        &self,
        context_id: &ContextId,
        owner: &SenderCommitment,
        amount: BondAmount,
    ) -> Result<String> {
        let mut next = self.next_lock.write().await;
        *next += 1;
        let lock_ref = format!(
            "lock-{}-{}-{}",
            *next,
            &context_id.to_hex()[..8],
            &owner.to_hex()[..8]
        );

        let mut locks = self.locks.write().await;
        locks.insert(lock_ref.clone(), amount);
        Ok(lock_ref)
    }

    async fn release_funds(&self, lock_ref: &str, _destination: ReleaseDestination) -> Result<()> {
        let mut locks = self.locks.write().await;
        if locks.remove(lock_ref).is_none() {
            bail!("unknown lock reference: {}", lock_ref);
        }
        Ok(())
    }

    async fn query_policy(&self, context_id: &ContextId) -> Result<ContextPolicy> {
        let policies = self.policies.read().await;
        match policies.get(context_id) {
            Some(policy) => Ok(policy.clone()),
            None => bail!("unknown context: {}", context_id),
        }
    }
}

/// Guardian-set authority adapter backed by an explicit grant table.
pub struct StaticAuthority {
    admins: Arc<RwLock<HashMap<ContextId, HashSet<String>>>>,
}

impl StaticAuthority {
    pub fn new() -> Self {
        Self {
            admins: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn grant(&self, context_id: ContextId, actor: impl Into<String>) {
        let mut admins = self.admins.write().await;
        admins.entry(context_id).or_default().insert(actor.into());
    }
}

impl Default for StaticAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthorityProvider for StaticAuthority {
    async fn authorize_admin(&self, context_id: &ContextId, actor: &str) -> Result<bool> {
        let admins = self.admins.read().await;
        Ok(admins
            .get(context_id)
            .map(|set| set.contains(actor))
            .unwrap_or(false))
    }

    async fn certify_witness(&self, circuit: &str, witness: &[u8]) -> Result<Vec<u8>> {
        // Opaque stand-in proof; real deployments plug a prover here
        let mut hasher = blake3::Hasher::new();
        hasher.update(circuit.as_bytes());
        hasher.update(witness);
        Ok(hasher.finalize().as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lock_release_cycle() {
        let settlement = MemorySettlement::new();
        let ctx = ContextId::new(b"ctx");
        let owner = SenderCommitment::from_bytes([1; 32]);

        let lock_ref = settlement
            .lock_funds(&ctx, &owner, BondAmount::from_units(5))
            .await
            .unwrap();
        assert_eq!(settlement.locked_count().await, 1);

        settlement
            .release_funds(&lock_ref, ReleaseDestination::Sender)
            .await
            .unwrap();
        assert_eq!(settlement.locked_count().await, 0);

        // Double release is a settlement-side error
        assert!(settlement
            .release_funds(&lock_ref, ReleaseDestination::Sender)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_witness_certification_is_deterministic() {
        let authority = StaticAuthority::new();
        let a = authority
            .certify_witness("slash-transition", b"witness-bytes")
            .await
            .unwrap();
        let b = authority
            .certify_witness("slash-transition", b"witness-bytes")
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);

        let other = authority
            .certify_witness("refund-transition", b"witness-bytes")
            .await
            .unwrap();
        assert_ne!(a, other);
    }

    #[tokio::test]
    async fn test_authority_grants() {
        let authority = StaticAuthority::new();
        let ctx = ContextId::new(b"ctx");

        assert!(!authority.authorize_admin(&ctx, "guardian-1").await.unwrap());
        authority.grant(ctx, "guardian-1").await;
        assert!(authority.authorize_admin(&ctx, "guardian-1").await.unwrap());
        assert!(!authority.authorize_admin(&ctx, "guardian-2").await.unwrap());
    }
}
