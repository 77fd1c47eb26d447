use blake3::Hasher;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! opaque_id {
    ($name:ident, $domain:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Derive an identifier from arbitrary bytes, domain-separated
            /// so the same input under two id types never collides.
            pub fn new(data: &[u8]) -> Self {
                let mut hasher = Hasher::new();
                hasher.update($domain.as_bytes());
                hasher.update(data);
                Self(hasher.finalize().into())
            }

            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
                let bytes = hex::decode(s)?;
                if bytes.len() != 32 {
                    return Err(hex::FromHexError::InvalidStringLength);
                }
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({}...)", stringify!($name), &self.to_hex()[..8])
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.to_hex())
            }
        }
    };
}

opaque_id!(ContextId, "veilbond.context");
opaque_id!(BondId, "veilbond.bond");
opaque_id!(AttestationId, "veilbond.attestation");
opaque_id!(EvidenceHash, "veilbond.evidence");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_hex_roundtrip() {
        let id = BondId::new(b"bond data");
        let hex = id.to_hex();
        let back = BondId::from_hex(&hex).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn test_id_determinism() {
        assert_eq!(ContextId::new(b"card-1"), ContextId::new(b"card-1"));
        assert_ne!(ContextId::new(b"card-1"), ContextId::new(b"card-2"));
    }

    #[test]
    fn test_domain_separation() {
        let ctx = ContextId::new(b"same");
        let bond = BondId::new(b"same");
        assert_ne!(ctx.as_bytes(), bond.as_bytes());
    }

    #[test]
    fn test_from_hex_rejects_short_input() {
        assert!(EvidenceHash::from_hex("deadbeef").is_err());
    }
}
