use crate::{CryptoError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use veilbond_types::{EvidenceRecord, SealedEvidence};

const NONCE_LEN: usize = 12;

/// Authenticated encryption for evidence at rest. The key is supplied
/// by the operator; the engine never persists it.
pub struct EvidenceCipher {
    key: [u8; 32],
}

impl EvidenceCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Generate a fresh random 256-bit key.
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Encrypt a record for storage. Nonce is random and prepended to
    /// the ciphertext; the expiry stays cleartext for the sweep index.
    pub fn seal(&self, record: &EvidenceRecord, expires_at: i64) -> Result<SealedEvidence> {
        let plaintext = serde_json::to_vec(record)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);

        Ok(SealedEvidence {
            evidence_hash: record.evidence_hash,
            ciphertext: sealed,
            expires_at,
        })
    }

    /// Decrypt and deserialize a stored record. Tampered ciphertext
    /// fails authentication and surfaces as a decryption error.
    pub fn open(&self, sealed: &SealedEvidence) -> Result<EvidenceRecord> {
        if sealed.ciphertext.len() < NONCE_LEN {
            return Err(CryptoError::DecryptionFailed(
                "ciphertext too short".into(),
            ));
        }

        let (nonce_bytes, body) = sealed.ciphertext.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, body)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

        serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}
