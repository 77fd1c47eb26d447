use serde::{Deserialize, Serialize};
use std::fmt;

/// Bond value in the smallest unit of the settlement currency.
/// The engine never fractions amounts; conversion to display units is
/// a concern of the settlement collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BondAmount(u64);

impl BondAmount {
    pub const ZERO: Self = Self(0);

    pub fn from_units(units: u64) -> Self {
        Self(units)
    }

    pub fn to_units(&self) -> u64 {
        self.0
    }

    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(&self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(&self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    pub fn saturating_mul(&self, factor: u64) -> Self {
        Self(self.0.saturating_mul(factor))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BondAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} units", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_arithmetic() {
        let a = BondAmount::from_units(5);
        let b = BondAmount::from_units(3);
        assert_eq!(a.checked_add(b), Some(BondAmount::from_units(8)));
        assert_eq!(b.checked_sub(a), None);
        assert_eq!(a.checked_sub(b), Some(BondAmount::from_units(2)));
    }

    #[test]
    fn test_saturating_mul_caps_at_max() {
        let a = BondAmount::from_units(u64::MAX);
        assert_eq!(a.saturating_mul(2), BondAmount::from_units(u64::MAX));
    }
}
