//! 64-bit affinity masks
//!
//! An [`AffinityMask`] is a bit-set where bit `i` permits scheduling on
//! logical CPU `i`. Only CPUs `0..64` are representable; conversions from CPU
//! id sets report the ids that had to be left out instead of dropping them
//! quietly.

use crate::error::{AffinityError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Number of CPUs a mask can address
pub const MASK_BITS: usize = 64;

/// A 64-bit processor affinity mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffinityMask(u64);

/// Result of converting a CPU id set to a mask
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskConversion {
    /// Mask of the representable CPUs
    pub mask: AffinityMask,
    /// CPU ids at or above 64, ascending
    pub truncated: Vec<usize>,
}

impl MaskConversion {
    /// Whether any CPU id was left out of the mask
    pub fn is_truncated(&self) -> bool {
        !self.truncated.is_empty()
    }

    /// Return the mask, or a truncation error if any CPU was left out
    pub fn strict(self) -> Result<AffinityMask> {
        if self.truncated.is_empty() {
            Ok(self.mask)
        } else {
            Err(AffinityError::Truncation {
                cpus: self.truncated,
            })
        }
    }
}

impl AffinityMask {
    /// Empty mask
    pub const EMPTY: Self = Self(0);

    /// Wrap a raw mask value
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw mask value
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Mask with the first `logical_processors` bits set
    pub fn full(logical_processors: usize) -> Self {
        if logical_processors >= MASK_BITS {
            Self(u64::MAX)
        } else {
            Self((1u64 << logical_processors) - 1)
        }
    }

    /// Build a mask from CPU ids, reporting ids that do not fit
    pub fn from_cpus<I>(cpus: I) -> MaskConversion
    where
        I: IntoIterator<Item = usize>,
    {
        let mut bits = 0u64;
        let mut truncated = BTreeSet::new();

        for cpu in cpus {
            if cpu < MASK_BITS {
                bits |= 1u64 << cpu;
            } else {
                truncated.insert(cpu);
            }
        }

        MaskConversion {
            mask: Self(bits),
            truncated: truncated.into_iter().collect(),
        }
    }

    /// CPU ids set in this mask, ascending
    pub fn cpu_ids(self) -> Vec<usize> {
        (0..MASK_BITS).filter(|&cpu| self.contains(cpu)).collect()
    }

    /// Whether CPU `cpu` is permitted by this mask
    pub fn contains(self, cpu: usize) -> bool {
        cpu < MASK_BITS && self.0 & (1u64 << cpu) != 0
    }

    /// Number of permitted CPUs
    pub fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Whether no CPU is permitted
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of CPUs shared with another mask
    pub fn intersection_count(self, other: Self) -> usize {
        (self.0 & other.0).count_ones() as usize
    }

    /// Whether the set bits form one unbroken run
    pub fn is_contiguous(self) -> bool {
        if self.0 == 0 {
            return false;
        }
        let shifted = self.0 >> self.0.trailing_zeros();
        shifted & shifted.wrapping_add(1) == 0
    }

    /// Uppercase hex without prefix, the stored rule value form
    pub fn to_hex_value(self) -> String {
        format!("{:X}", self.0)
    }

    /// Parse a stored rule value (hex, optional `0x` prefix)
    pub fn from_hex_value(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.is_empty() {
            return Err(AffinityError::format(value, "empty hex value"));
        }

        u64::from_str_radix(digits, 16)
            .map(Self)
            .map_err(|e| AffinityError::format(value, e.to_string()))
    }
}

impl fmt::Display for AffinityMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl From<u64> for AffinityMask {
    fn from(bits: u64) -> Self {
        Self(bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_display_is_uppercase_unpadded() {
        assert_eq!(AffinityMask::from_bits(0xf0).to_string(), "0xF0");
        assert_eq!(AffinityMask::from_bits(0).to_string(), "0x0");
        assert_eq!(AffinityMask::from_bits(0xab).to_hex_value(), "AB");
    }

    #[test]
    fn test_truncation_is_reported() {
        let conversion = AffinityMask::from_cpus([0, 3, 64, 70, 64]);
        assert_eq!(conversion.mask.bits(), 0b1001);
        assert_eq!(conversion.truncated, vec![64, 70]);
        assert!(conversion.is_truncated());
        assert!(matches!(
            conversion.strict(),
            Err(AffinityError::Truncation { .. })
        ));
    }

    #[test]
    fn test_full_mask() {
        assert_eq!(AffinityMask::full(8).bits(), 0xFF);
        assert_eq!(AffinityMask::full(64).bits(), u64::MAX);
        assert_eq!(AffinityMask::full(128).bits(), u64::MAX);
        assert_eq!(AffinityMask::full(0).bits(), 0);
    }

    #[test]
    fn test_contiguous() {
        assert!(AffinityMask::from_bits(0b0111_1000).is_contiguous());
        assert!(AffinityMask::from_bits(u64::MAX).is_contiguous());
        assert!(!AffinityMask::from_bits(0b1010).is_contiguous());
        assert!(!AffinityMask::EMPTY.is_contiguous());
    }

    #[test]
    fn test_hex_value_parsing() {
        assert_eq!(AffinityMask::from_hex_value("0000000F").unwrap().bits(), 0xF);
        assert_eq!(AffinityMask::from_hex_value("0xff").unwrap().bits(), 0xFF);
        assert!(AffinityMask::from_hex_value("").is_err());
        assert!(AffinityMask::from_hex_value("xyz").is_err());
    }

    proptest! {
        #[test]
        fn prop_cpu_set_round_trip(cpus in proptest::collection::vec(0usize..64, 0..80)) {
            let mut expected = cpus.clone();
            expected.sort_unstable();
            expected.dedup();

            let conversion = AffinityMask::from_cpus(cpus);
            prop_assert!(!conversion.is_truncated());
            prop_assert_eq!(conversion.mask.cpu_ids(), expected);
        }
    }
}
