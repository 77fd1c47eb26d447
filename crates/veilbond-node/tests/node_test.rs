use veilbond_crypto::{derive_nullifier, derive_sender_commitment};
use veilbond_node::config::{ContextEntry, NodeConfig};
use veilbond_node::VeilbondNode;
use veilbond_relay::{EngagementKind, InboundMessage};
use veilbond_types::{BondAmount, BondError, BondState, ContextId};

fn test_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.api.enabled = false;
    config.contexts.push(ContextEntry {
        name: "alice-card".to_string(),
        requires_bond: true,
        base_minimum_units: 3,
        ttl_secs: 3_600,
        challenge_window_secs: 86_400,
        guardians: vec!["guardian-1".to_string()],
    });
    config
}

fn message(content: &[u8]) -> InboundMessage {
    InboundMessage {
        content: content.to_vec(),
        sent_at: chrono::Utc::now().timestamp(),
        transport_signature: vec![0xCD; 64],
    }
}

#[tokio::test]
async fn test_full_contact_flow_through_node() {
    let node = VeilbondNode::new(test_config()).await.unwrap();

    let context_id = ContextId::new(b"alice-card");
    let sender = derive_sender_commitment(&context_id, &[42u8; 32], &[9u8; 16]).unwrap();
    let nullifier = derive_nullifier(&[3u8; 32], &context_id);

    // Without a bond the relay refuses
    let err = node
        .verify_and_forward(&context_id, &sender, message(b"hello?"))
        .await
        .unwrap_err();
    assert!(matches!(err, BondError::NotFound(_)));

    let bond_id = node
        .post_bond(&context_id, &sender, nullifier, BondAmount::from_units(3), 3_600)
        .await
        .unwrap();

    let result = node
        .verify_and_forward(&context_id, &sender, message(b"hello!"))
        .await
        .unwrap();
    result.sender_receipt.verify().unwrap();
    result.recipient_receipt.verify().unwrap();

    // Recipient replies, bond comes back
    let refunded = node
        .handle_engagement(&context_id, &sender, EngagementKind::Reply)
        .await
        .unwrap();
    assert!(refunded);
    assert_eq!(
        node.get_bond(&bond_id).await.unwrap().state,
        BondState::Refunded
    );

    let rep = node.get_reputation(&sender).await.unwrap();
    assert_eq!(rep.posted_count, 1);
    assert_eq!(rep.engaged_count, 1);
}

#[tokio::test]
async fn test_attestation_flow_through_node() {
    let node = VeilbondNode::new(test_config()).await.unwrap();

    let context_id = ContextId::new(b"alice-card");
    let sender = derive_sender_commitment(&context_id, &[43u8; 32], &[9u8; 16]).unwrap();
    let nullifier = derive_nullifier(&[4u8; 32], &context_id);

    let bond_id = node
        .post_bond(&context_id, &sender, nullifier, BondAmount::from_units(5), 3_600)
        .await
        .unwrap();

    let forward = node
        .verify_and_forward(&context_id, &sender, message(b"spam"))
        .await
        .unwrap();

    // Only a configured guardian may attest
    let err = node
        .file_attestation(&context_id, &sender, forward.evidence_hash, "random")
        .await
        .unwrap_err();
    assert!(matches!(err, BondError::Unauthorized { .. }));

    let attestation_id = node
        .file_attestation(&context_id, &sender, forward.evidence_hash, "guardian-1")
        .await
        .unwrap();
    assert_eq!(
        node.get_bond(&bond_id).await.unwrap().state,
        BondState::Frozen
    );

    // Dispute within the window refunds and settles the attestation
    node.dispute_attestation(&attestation_id, forward.evidence_hash)
        .await
        .unwrap();
    assert_eq!(
        node.get_bond(&bond_id).await.unwrap().state,
        BondState::Refunded
    );

    let stats = node.get_stats().await.unwrap();
    assert_eq!(stats.bond_count, 1);
    assert_eq!(stats.unresolved_bond_count, 0);
    assert_eq!(stats.evidence_count, 1);
}
