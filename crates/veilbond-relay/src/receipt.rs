use serde::{Deserialize, Serialize};
use veilbond_crypto::{ReceiptSigner, ReceiptVerifier};
use veilbond_types::{BondError, ContextId, EvidenceHash, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptRole {
    Sender,
    Recipient,
}

/// Non-repudiable proof of forwarding. Binds the message fingerprint
/// to the evidence hash under the relay's signature, so either party
/// can later prove what was sent without exposing the content itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub role: ReceiptRole,
    pub context_id: ContextId,
    pub message_fingerprint: [u8; 32],
    pub evidence_hash: EvidenceHash,
    pub issued_at: i64,
    pub signer_public_key: [u8; 32],
    pub signature: Vec<u8>,
}

impl Receipt {
    /// Canonical byte string covered by the signature.
    fn signed_bytes(
        role: ReceiptRole,
        context_id: &ContextId,
        message_fingerprint: &[u8; 32],
        evidence_hash: &EvidenceHash,
        issued_at: i64,
    ) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + 32 + 32 + 32 + 8);
        bytes.push(match role {
            ReceiptRole::Sender => 0u8,
            ReceiptRole::Recipient => 1u8,
        });
        bytes.extend_from_slice(context_id.as_bytes());
        bytes.extend_from_slice(message_fingerprint);
        bytes.extend_from_slice(evidence_hash.as_bytes());
        bytes.extend_from_slice(&issued_at.to_le_bytes());
        bytes
    }

    /// Offline verification against the embedded public key.
    pub fn verify(&self) -> Result<()> {
        let signature: [u8; 64] = self
            .signature
            .as_slice()
            .try_into()
            .map_err(|_| BondError::InvalidParameter("malformed receipt signature".to_string()))?;

        let bytes = Self::signed_bytes(
            self.role,
            &self.context_id,
            &self.message_fingerprint,
            &self.evidence_hash,
            self.issued_at,
        );

        ReceiptVerifier::verify(&self.signer_public_key, &bytes, &signature)
            .map_err(|_| BondError::InvalidParameter("receipt signature invalid".to_string()))
    }
}

/// Issues the two receipts produced by every successful forward.
pub struct ReceiptIssuer {
    signer: ReceiptSigner,
}

impl ReceiptIssuer {
    pub fn new(signer: ReceiptSigner) -> Self {
        Self { signer }
    }

    pub fn issue(
        &self,
        role: ReceiptRole,
        context_id: &ContextId,
        message_fingerprint: &[u8; 32],
        evidence_hash: &EvidenceHash,
        issued_at: i64,
    ) -> Receipt {
        let bytes =
            Receipt::signed_bytes(role, context_id, message_fingerprint, evidence_hash, issued_at);
        Receipt {
            role,
            context_id: *context_id,
            message_fingerprint: *message_fingerprint,
            evidence_hash: *evidence_hash,
            issued_at,
            signer_public_key: self.signer.verifying_key(),
            signature: self.signer.sign(&bytes).to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_receipt_verifies() {
        let issuer = ReceiptIssuer::new(ReceiptSigner::from_seed([1u8; 32]));
        let receipt = issuer.issue(
            ReceiptRole::Sender,
            &ContextId::new(b"card"),
            &[2u8; 32],
            &EvidenceHash::new(b"e"),
            1_700_000_000,
        );
        receipt.verify().unwrap();
    }

    #[test]
    fn test_tampered_receipt_fails() {
        let issuer = ReceiptIssuer::new(ReceiptSigner::from_seed([1u8; 32]));
        let mut receipt = issuer.issue(
            ReceiptRole::Recipient,
            &ContextId::new(b"card"),
            &[2u8; 32],
            &EvidenceHash::new(b"e"),
            1_700_000_000,
        );
        receipt.issued_at += 1;
        assert!(receipt.verify().is_err());
    }
}
