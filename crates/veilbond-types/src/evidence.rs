use crate::{ContextId, EvidenceHash, SenderCommitment};
use serde::{Deserialize, Serialize};

/// What the relay captures for every forwarded message. The content
/// itself is never stored, only a one-way fingerprint of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub evidence_hash: EvidenceHash,
    /// One-way digest of the message content
    pub content_fingerprint: [u8; 32],
    /// Signature produced by the transport over the forwarded payload
    pub transport_signature: Vec<u8>,
    pub sender_commitment: SenderCommitment,
    pub context_id: ContextId,
    pub recorded_at: i64,
}

/// Evidence as persisted: AES-256-GCM ciphertext of the serialized
/// record plus the cleartext expiry the sweep indexes on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealedEvidence {
    pub evidence_hash: EvidenceHash,
    pub ciphertext: Vec<u8>,
    pub expires_at: i64,
}
