use std::sync::Arc;
use veilbond_crypto::{derive_nullifier, derive_sender_commitment, EvidenceCipher, ReceiptSigner};
use veilbond_ledger::{BondLedger, LedgerConfig, MemorySettlement, ReputationStore};
use veilbond_relay::{
    EngagementKind, EvidenceConfig, EvidenceStore, InboundMessage, NullDelivery, RateLimitConfig,
    RateLimiter, ReceiptIssuer, Relay, RelayConfig,
};
use veilbond_storage::MemoryBackend;
use veilbond_types::{
    BondAmount, BondError, BondState, ContextId, ContextPolicy, SenderCommitment,
};

const NOW: i64 = 1_700_000_000;
const TTL: i64 = 7 * 24 * 3600;

struct Fixture {
    relay: Relay,
    ledger: Arc<BondLedger>,
    context_id: ContextId,
    sender: SenderCommitment,
}

impl Fixture {
    fn message(&self, content: &[u8], sent_at: i64) -> InboundMessage {
        InboundMessage {
            content: content.to_vec(),
            sent_at,
            transport_signature: vec![0xAB; 64],
        }
    }

    async fn post_bond(&self, units: u64) {
        let nullifier = derive_nullifier(&[3u8; 32], &self.context_id);
        self.ledger
            .post_bond(
                &self.context_id,
                &self.sender,
                nullifier,
                BondAmount::from_units(units),
                TTL,
                NOW,
            )
            .await
            .unwrap();
    }
}

async fn fixture_with_quota(base_quota: u32) -> Fixture {
    let storage = Arc::new(MemoryBackend::new());
    let settlement = Arc::new(MemorySettlement::new());
    let context_id = ContextId::new(b"recipient-card");
    settlement
        .set_policy(
            context_id,
            ContextPolicy {
                requires_bond: true,
                base_minimum: BondAmount::from_units(3),
                ttl_secs: TTL,
                challenge_window_secs: 24 * 3600,
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

    let relay = Relay::new(
        ledger.clone(),
        storage.clone(),
        RateLimiter::new(RateLimitConfig {
            window_secs: 3_600,
            base_quota,
        }),
        EvidenceStore::new(
            storage,
            EvidenceCipher::new([7u8; 32]),
            EvidenceConfig::default(),
        ),
        ReceiptIssuer::new(ReceiptSigner::from_seed([1u8; 32])),
        Arc::new(NullDelivery),
        RelayConfig::default(),
    );

    let sender =
        derive_sender_commitment(&context_id, &[42u8; 32], &[9u8; 16]).unwrap();

    Fixture {
        relay,
        ledger,
        context_id,
        sender,
    }
}

async fn fixture() -> Fixture {
    fixture_with_quota(10).await
}

#[tokio::test]
async fn test_forward_then_engagement_refund() {
    // Post, forward, get a reply, bond comes back
    let f = fixture().await;
    f.post_bond(3).await;

    let result = f
        .relay
        .verify_and_forward(&f.context_id, &f.sender, f.message(b"hello", NOW + 5), NOW + 10)
        .await
        .unwrap();

    // Both receipts verify offline and bind the same evidence
    result.sender_receipt.verify().unwrap();
    result.recipient_receipt.verify().unwrap();
    assert_eq!(result.sender_receipt.evidence_hash, result.evidence_hash);
    assert_eq!(result.recipient_receipt.evidence_hash, result.evidence_hash);

    // The evidence trail exists before any abuse is ever reported
    let evidence = f.relay.evidence().fetch(&result.evidence_hash).await.unwrap();
    assert_eq!(evidence.sender_commitment, f.sender);

    let refunded = f
        .relay
        .handle_engagement(&f.context_id, &f.sender, EngagementKind::Reply, NOW + 60)
        .await
        .unwrap();
    assert!(refunded);

    assert!(!f
        .ledger
        .has_active_bond(&f.context_id, &f.sender, NOW + 61)
        .await
        .unwrap());

    // Engagement against a spent bond is a quiet no-op
    let again = f
        .relay
        .handle_engagement(&f.context_id, &f.sender, EngagementKind::Accept, NOW + 62)
        .await
        .unwrap();
    assert!(!again);
}

#[tokio::test]
async fn test_unbonded_sender_rejected() {
    let f = fixture().await;

    let err = f
        .relay
        .verify_and_forward(&f.context_id, &f.sender, f.message(b"hi", NOW), NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, BondError::NotFound(_)));
}

#[tokio::test]
async fn test_rate_limit_rejection_carries_retry_after() {
    let f = fixture_with_quota(2).await;
    f.post_bond(3).await;

    for i in 0..2 {
        f.relay
            .verify_and_forward(
                &f.context_id,
                &f.sender,
                f.message(format!("msg-{i}").as_bytes(), NOW + i),
                NOW + i,
            )
            .await
            .unwrap();
    }

    let err = f
        .relay
        .verify_and_forward(&f.context_id, &f.sender, f.message(b"msg-3", NOW + 10), NOW + 10)
        .await
        .unwrap_err();
    match err {
        BondError::RateLimited { retry_after_secs } => assert!(retry_after_secs > 0),
        other => panic!("expected RateLimited, got {other}"),
    }
}

#[tokio::test]
async fn test_replayed_content_rejected() {
    let f = fixture().await;
    f.post_bond(3).await;

    f.relay
        .verify_and_forward(&f.context_id, &f.sender, f.message(b"once", NOW), NOW)
        .await
        .unwrap();

    let err = f
        .relay
        .verify_and_forward(&f.context_id, &f.sender, f.message(b"once", NOW + 1), NOW + 1)
        .await
        .unwrap_err();
    assert!(matches!(err, BondError::InvalidParameter(_)));
}

#[tokio::test]
async fn test_stale_message_rejected() {
    let f = fixture().await;
    f.post_bond(3).await;

    let stale = f.message(b"old news", NOW - 3_600);
    let err = f
        .relay
        .verify_and_forward(&f.context_id, &f.sender, stale, NOW)
        .await
        .unwrap_err();
    assert!(matches!(err, BondError::InvalidParameter(_)));
}

#[tokio::test]
async fn test_engagement_leaves_frozen_bond_alone() {
    let f = fixture().await;
    f.post_bond(3).await;

    let bond = f
        .ledger
        .active_bond(&f.context_id, &f.sender, NOW + 1)
        .await
        .unwrap()
        .unwrap();
    f.ledger.freeze_bond(&bond.id, NOW + 2).await.unwrap();

    // A reply after the freeze cannot short-circuit the challenge window
    let refunded = f
        .relay
        .handle_engagement(&f.context_id, &f.sender, EngagementKind::Reply, NOW + 3)
        .await
        .unwrap();
    assert!(!refunded);
    assert_eq!(
        f.ledger.get_bond(&bond.id).await.unwrap().state,
        BondState::Frozen
    );
}
