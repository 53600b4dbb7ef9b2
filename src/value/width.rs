//! Bus widths.

use std::fmt;

use crate::error::{Result, SimError};

use super::Value;

/// Number of bits carried by a bus.
///
/// Width 0 is reserved for [`BitWidth::UNKNOWN`], the width of a point that
/// no component end determines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BitWidth(u8);

impl BitWidth {
    /// Width not determined by any component.
    pub const UNKNOWN: BitWidth = BitWidth(0);

    /// Single-bit width.
    pub const ONE: BitWidth = BitWidth(1);

    /// Create a width, checking it against [`Value::MAX_WIDTH`].
    pub fn new(width: u32) -> Result<Self> {
        Self::with_limit(width, Value::MAX_WIDTH)
    }

    /// Create a width, checking it against a configured ceiling.
    pub fn with_limit(width: u32, max: u32) -> Result<Self> {
        let max = max.min(Value::MAX_WIDTH);
        if width == 0 || width > max {
            return Err(SimError::InvalidWidth { width, max });
        }
        Ok(BitWidth(width as u8))
    }

    /// Number of bits.
    pub fn bits(&self) -> u32 {
        self.0 as u32
    }

    /// Check if this is the unknown width.
    pub fn is_unknown(&self) -> bool {
        self.0 == 0
    }

    /// Mask with the low `bits()` bits set.
    pub fn mask(&self) -> u64 {
        mask(self.0 as u32)
    }
}

/// Mask with the low `width` bits set.
pub(crate) fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

impl fmt::Display for BitWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "?")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_width_limits() {
        assert!(BitWidth::new(0).is_err());
        assert!(BitWidth::new(65).is_err());
        assert_eq!(BitWidth::new(64).unwrap().bits(), 64);
        assert!(BitWidth::with_limit(33, 32).is_err());
        assert_eq!(BitWidth::with_limit(32, 32).unwrap().bits(), 32);
    }

    #[test]
    fn test_width_mask() {
        assert_eq!(BitWidth::new(4).unwrap().mask(), 0xF);
        assert_eq!(BitWidth::new(64).unwrap().mask(), u64::MAX);
        assert_eq!(BitWidth::UNKNOWN.mask(), 0);
    }
}
