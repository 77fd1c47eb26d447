pub mod derive;
pub mod receipts;
pub mod sealing;

pub use derive::{derive_nullifier, derive_sender_commitment, fingerprint_content};
pub use receipts::{ReceiptSigner, ReceiptVerifier};
pub use sealing::EvidenceCipher;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("invalid key size")]
    InvalidKeySize,

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("signature verification failed")]
    SignatureVerificationFailed,
}

pub type Result<T> = std::result::Result<T, CryptoError>;
