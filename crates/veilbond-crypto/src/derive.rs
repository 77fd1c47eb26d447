use crate::{CryptoError, Result};
use veilbond_types::{ContextId, SenderCommitment, SenderNullifier};

const COMMITMENT_DOMAIN: &str = "veilbond.sender-commitment.v1";
const NULLIFIER_DOMAIN: &[u8] = b"veilbond.nullifier.v1";
const FINGERPRINT_DOMAIN: &str = "veilbond.content-fingerprint.v1";

/// Salts shorter than this are rejected; a short salt weakens the
/// unlinkability guarantee the commitment exists to provide.
pub const MIN_SALT_LEN: usize = 16;

/// Derive the per-context pseudonym for a sender.
///
/// Deterministic: equal (context, identity, salt) always yields the
/// same commitment, so reputation can accrue per context. The context
/// id is mixed into the key-derivation domain, so the same identity
/// under two contexts produces unlinkable values.
pub fn derive_sender_commitment(
    context_id: &ContextId,
    identity_commitment: &[u8; 32],
    salt: &[u8],
) -> Result<SenderCommitment> {
    if salt.len() < MIN_SALT_LEN {
        return Err(CryptoError::MalformedInput(format!(
            "salt must be at least {} bytes, got {}",
            MIN_SALT_LEN,
            salt.len()
        )));
    }

    let mut hasher = blake3::Hasher::new_derive_key(COMMITMENT_DOMAIN);
    hasher.update(context_id.as_bytes());
    hasher.update(identity_commitment);
    hasher.update(salt);
    Ok(SenderCommitment::from_bytes(hasher.finalize().into()))
}

/// Keyed PRF over the context id, emitted only at slash time.
/// Links repeat offenses within one context; reveals nothing else.
pub fn derive_nullifier(secret: &[u8; 32], context_id: &ContextId) -> SenderNullifier {
    let mut input = Vec::with_capacity(NULLIFIER_DOMAIN.len() + 32);
    input.extend_from_slice(NULLIFIER_DOMAIN);
    input.extend_from_slice(context_id.as_bytes());
    SenderNullifier::from_bytes(blake3::keyed_hash(secret, &input).into())
}

/// One-way digest of message content. Stored in place of the content
/// itself so evidence never exposes what was sent.
pub fn fingerprint_content(content: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(FINGERPRINT_DOMAIN);
    hasher.update(content);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_determinism() {
        let ctx = ContextId::new(b"card");
        let identity = [42u8; 32];
        let salt = [9u8; 16];

        let a = derive_sender_commitment(&ctx, &identity, &salt).unwrap();
        let b = derive_sender_commitment(&ctx, &identity, &salt).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_commitment_unlinkable_across_contexts() {
        let identity = [42u8; 32];
        let salt = [9u8; 16];

        let a = derive_sender_commitment(&ContextId::new(b"card-a"), &identity, &salt).unwrap();
        let b = derive_sender_commitment(&ContextId::new(b"card-b"), &identity, &salt).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_commitment_rejects_short_salt() {
        let ctx = ContextId::new(b"card");
        let err = derive_sender_commitment(&ctx, &[0u8; 32], &[1u8; 8]);
        assert!(matches!(err, Err(CryptoError::MalformedInput(_))));
    }

    #[test]
    fn test_nullifier_stable_within_context() {
        let secret = [3u8; 32];
        let ctx = ContextId::new(b"card");
        assert_eq!(
            derive_nullifier(&secret, &ctx),
            derive_nullifier(&secret, &ctx)
        );
        assert_ne!(
            derive_nullifier(&secret, &ctx),
            derive_nullifier(&secret, &ContextId::new(b"other"))
        );
    }

    #[test]
    fn test_fingerprint_differs_from_plain_hash() {
        // Domain separation keeps fingerprints from colliding with ids
        let content = b"hello";
        assert_ne!(
            fingerprint_content(content),
            *blake3::hash(content).as_bytes()
        );
    }
}
