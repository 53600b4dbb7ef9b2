//! Logic values.
//!
//! A [`Value`] is an immutable vector of up to [`Value::MAX_WIDTH`] bits. Each
//! bit is one of four digits:
//!
//! | Digit | Meaning |
//! |-------|---------|
//! | `0` | driven low |
//! | `1` | driven high |
//! | `x` | unknown / floating (no driver) |
//! | `E` | error (conflicting drivers, or derived from an error) |
//!
//! Bits are stored as three masks (`error`, `unknown`, `bits`) that are kept
//! normalized, so derived equality compares content.
//!
//! The zero-width value [`Value::NIL`] means "nothing asserted here".

mod width;

use std::fmt;

pub use width::BitWidth;
use width::mask;

/// An immutable multi-bit four-state logic value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Value {
    width: u8,
    error: u64,
    unknown: u64,
    bits: u64,
}

impl Value {
    /// Largest width a value can carry.
    pub const MAX_WIDTH: u32 = 64;

    /// Zero-width value: no driver.
    pub const NIL: Value = Value::raw(0, 0, 0, 0);
    /// Single bit driven low.
    pub const FALSE: Value = Value::raw(1, 0, 0, 0);
    /// Single bit driven high.
    pub const TRUE: Value = Value::raw(1, 0, 0, 1);
    /// Single floating bit.
    pub const UNKNOWN: Value = Value::raw(1, 0, 1, 0);
    /// Single error bit.
    pub const ERROR: Value = Value::raw(1, 1, 0, 0);

    const fn raw(width: u8, error: u64, unknown: u64, bits: u64) -> Self {
        Self {
            width,
            error,
            unknown,
            bits,
        }
    }

    fn create(width: u32, error: u64, unknown: u64, bits: u64) -> Self {
        let width = width.min(Self::MAX_WIDTH);
        let m = mask(width);
        let error = error & m;
        let unknown = unknown & m & !error;
        let bits = bits & m & !unknown & !error;
        Self::raw(width as u8, error, unknown, bits)
    }

    /// Fully defined value of the given width.
    pub fn known(width: BitWidth, bits: u64) -> Self {
        Self::create(width.bits(), 0, 0, bits)
    }

    /// All-floating value of the given width.
    pub fn unknown(width: BitWidth) -> Self {
        Self::create(width.bits(), 0, u64::MAX, 0)
    }

    /// All-error value of the given width.
    pub fn error(width: BitWidth) -> Self {
        Self::create(width.bits(), u64::MAX, 0, 0)
    }

    /// Single-bit value from a bool.
    pub fn from_bool(b: bool) -> Self {
        if b {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }

    /// Assemble a value from single-bit values, least significant first.
    ///
    /// Inputs wider than one bit contribute only their bit 0.
    pub fn from_bits(bits: &[Value]) -> Self {
        debug_assert!(bits.len() as u32 <= Self::MAX_WIDTH);
        let mut error = 0u64;
        let mut unknown = 0u64;
        let mut value = 0u64;
        for (i, b) in bits.iter().take(Self::MAX_WIDTH as usize).enumerate() {
            let m = 1u64 << i;
            if b.width == 0 || b.error & 1 != 0 {
                error |= m;
            } else if b.unknown & 1 != 0 {
                unknown |= m;
            } else if b.bits & 1 != 0 {
                value |= m;
            }
        }
        Self::create(bits.len() as u32, error, unknown, value)
    }

    /// Repeat a single-bit value across `width` bits.
    pub fn repeat(bit: Value, width: BitWidth) -> Self {
        let w = width.bits();
        let fill = |set: bool| if set { u64::MAX } else { 0 };
        Self::create(
            w,
            fill(bit.error & 1 != 0),
            fill(bit.unknown & 1 != 0),
            fill(bit.bits & 1 != 0),
        )
    }

    /// Width of the value.
    pub fn width(&self) -> BitWidth {
        // width is always within 0..=MAX_WIDTH, so this never fails
        BitWidth::new(self.width as u32).unwrap_or(BitWidth::UNKNOWN)
    }

    /// Number of bits.
    pub fn len(&self) -> u32 {
        self.width as u32
    }

    /// Check if this is the zero-width value.
    pub fn is_nil(&self) -> bool {
        self.width == 0
    }

    /// Check if this is the zero-width value.
    pub fn is_empty(&self) -> bool {
        self.is_nil()
    }

    /// Check if any bit is an error.
    pub fn is_error(&self) -> bool {
        self.error != 0
    }

    /// Check if every bit is floating.
    pub fn is_unknown(&self) -> bool {
        self.width > 0 && self.error == 0 && self.unknown == mask(self.width as u32)
    }

    /// Check if every bit is a driven 0 or 1.
    pub fn is_fully_defined(&self) -> bool {
        self.width > 0 && self.error == 0 && self.unknown == 0
    }

    /// Integer view of a fully defined value.
    pub fn to_u64(&self) -> Option<u64> {
        if self.is_fully_defined() {
            Some(self.bits)
        } else {
            None
        }
    }

    /// Single bit `which`; out-of-range reads are errors.
    pub fn get(&self, which: u32) -> Value {
        if which >= self.width as u32 {
            return Self::ERROR;
        }
        let m = 1u64 << which;
        if self.error & m != 0 {
            Self::ERROR
        } else if self.unknown & m != 0 {
            Self::UNKNOWN
        } else if self.bits & m != 0 {
            Self::TRUE
        } else {
            Self::FALSE
        }
    }

    /// Replace bit `which` with a single-bit value.
    pub fn set(&self, which: u32, bit: Value) -> Value {
        if which >= self.width as u32 {
            return *self;
        }
        let keep = !(1u64 << which);
        let place = |mask: u64| (mask & 1) << which;
        Self::create(
            self.width as u32,
            (self.error & keep) | place(bit.error),
            (self.unknown & keep) | place(bit.unknown),
            (self.bits & keep) | place(bit.bits),
        )
    }

    /// All bits as single-bit values, least significant first.
    pub fn to_bits(&self) -> Vec<Value> {
        (0..self.width as u32).map(|i| self.get(i)).collect()
    }

    /// Bits `start .. start + len` as a new value.
    ///
    /// Bits beyond this value's width read as errors.
    pub fn extract(&self, start: u32, len: u32) -> Value {
        let len = len.min(Self::MAX_WIDTH);
        let avail = (self.width as u32).saturating_sub(start).min(len);
        let shift = |mask: u64| if start >= 64 { 0 } else { mask >> start };
        let missing = mask(len) & !mask(avail);
        Self::create(
            len,
            shift(self.error) | missing,
            shift(self.unknown),
            shift(self.bits),
        )
    }

    /// Concatenate `high` above this value.
    pub fn concat(&self, high: Value) -> Value {
        let lo = self.width as u32;
        let width = (lo + high.width as u32).min(Self::MAX_WIDTH);
        let up = |mask: u64| if lo >= 64 { 0 } else { mask << lo };
        Self::create(
            width,
            self.error | up(high.error),
            self.unknown | up(high.unknown),
            self.bits | up(high.bits),
        )
    }

    /// Widen (or narrow) to `new_width`, filling new bits with `fill`.
    pub fn extend_width(&self, new_width: BitWidth, fill: Value) -> Value {
        let w = self.width as u32;
        if new_width.bits() == w {
            return *self;
        }
        let upper = !mask(w);
        let (e, u, b) = if fill == Self::ERROR {
            (upper, 0, 0)
        } else if fill == Self::TRUE {
            (0, 0, upper)
        } else if fill == Self::FALSE {
            (0, 0, 0)
        } else {
            (0, upper, 0)
        };
        Self::create(
            new_width.bits(),
            self.error | e,
            self.unknown | u,
            self.bits | b,
        )
    }

    /// Combine two drivers of the same bits.
    ///
    /// Equal digits keep their value, a floating digit yields to a defined one,
    /// disagreeing defined digits and anything touching an error become errors.
    /// NIL is the identity.
    pub fn combine(&self, other: Value) -> Value {
        if self.is_nil() {
            return other;
        }
        if other.is_nil() {
            return *self;
        }
        let disagree = (self.bits ^ other.bits) & !(self.unknown | other.unknown);
        Self::create(
            self.width.max(other.width) as u32,
            self.error | other.error | disagree,
            self.unknown & other.unknown,
            (self.bits & !self.unknown) | (other.bits & !other.unknown),
        )
    }

    /// Bitwise NOT; floating and error bits are preserved.
    pub fn not(&self) -> Value {
        Self::create(
            self.width as u32,
            self.error,
            self.unknown,
            !self.bits & !(self.error | self.unknown),
        )
    }

    fn known_zeros(&self) -> u64 {
        mask(self.width as u32) & !(self.bits | self.error | self.unknown)
    }

    /// Bitwise AND; a driven 0 dominates.
    pub fn and(&self, other: Value) -> Value {
        let zeros = self.known_zeros() | other.known_zeros();
        let error = (self.error | other.error) & !zeros;
        Self::create(
            self.width.max(other.width) as u32,
            error,
            (self.unknown | other.unknown) & !zeros & !error,
            self.bits & other.bits,
        )
    }

    /// Bitwise OR; a driven 1 dominates.
    pub fn or(&self, other: Value) -> Value {
        let ones = self.bits | other.bits;
        let error = (self.error | other.error) & !ones;
        Self::create(
            self.width.max(other.width) as u32,
            error,
            (self.unknown | other.unknown) & !ones & !error,
            ones,
        )
    }

    /// Bitwise XOR; any non-driven input bit poisons the output bit.
    pub fn xor(&self, other: Value) -> Value {
        let error = self.error | other.error;
        let unknown = (self.unknown | other.unknown) & !error;
        Self::create(
            self.width.max(other.width) as u32,
            error,
            unknown,
            (self.bits ^ other.bits) & !(error | unknown),
        )
    }

    /// Hexadecimal rendering; nibbles containing `x`/`E` print that digit.
    pub fn to_hex_string(&self) -> String {
        if self.width <= 1 {
            return self.to_string();
        }
        let w = self.width as u32;
        let digits = (w + 3) / 4;
        (0..digits)
            .rev()
            .map(|k| {
                let nibble = self.extract(4 * k, (w - 4 * k).min(4));
                if nibble.is_error() {
                    'E'
                } else if nibble.unknown != 0 {
                    'x'
                } else {
                    std::char::from_digit(nibble.bits as u32, 16).unwrap_or('?')
                }
            })
            .collect()
    }

    fn digit(&self, which: u32) -> char {
        let m = 1u64 << which;
        if self.error & m != 0 {
            'E'
        } else if self.unknown & m != 0 {
            'x'
        } else if self.bits & m != 0 {
            '1'
        } else {
            '0'
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::NIL
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.width == 0 {
            return write!(f, "-");
        }
        for i in (0..self.width as u32).rev() {
            write!(f, "{}", self.digit(i))?;
            if i % 4 == 0 && i != 0 {
                write!(f, " ")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value[{}]({})", self.width, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn w(n: u32) -> BitWidth {
        BitWidth::new(n).unwrap()
    }

    /// Parse "10xE" (most significant first) into a value.
    fn v(s: &str) -> Value {
        let bits: Vec<Value> = s
            .chars()
            .rev()
            .map(|c| match c {
                '0' => Value::FALSE,
                '1' => Value::TRUE,
                'x' => Value::UNKNOWN,
                _ => Value::ERROR,
            })
            .collect();
        Value::from_bits(&bits)
    }

    #[test]
    fn test_combine_single_bit() {
        assert_eq!(Value::TRUE.combine(Value::TRUE), Value::TRUE);
        assert_eq!(Value::TRUE.combine(Value::FALSE), Value::ERROR);
        assert_eq!(Value::TRUE.combine(Value::UNKNOWN), Value::TRUE);
        assert_eq!(Value::UNKNOWN.combine(Value::FALSE), Value::FALSE);
        assert_eq!(Value::UNKNOWN.combine(Value::UNKNOWN), Value::UNKNOWN);
        assert_eq!(Value::ERROR.combine(Value::UNKNOWN), Value::ERROR);
        assert_eq!(Value::NIL.combine(Value::TRUE), Value::TRUE);
    }

    #[test]
    fn test_combine_bus() {
        assert_eq!(v("10x1").combine(v("1x01")), v("1001"));
        assert_eq!(v("1100").combine(v("1010")), v("1EE0"));
    }

    #[test]
    fn test_logic_ops() {
        assert_eq!(v("01xE").not(), v("10xE"));
        assert_eq!(v("0000").and(v("1xE1")), v("0000"));
        assert_eq!(v("1111").and(v("1xE0")), v("1xE0"));
        assert_eq!(v("1111").or(v("0xE0")), v("1111"));
        assert_eq!(v("0000").or(v("1xE0")), v("1xE0"));
        assert_eq!(v("0110").xor(v("0101")), v("0011"));
        assert_eq!(v("0x").xor(v("E1")), v("Ex"));
    }

    #[test]
    fn test_definedness() {
        assert!(v("0101").is_fully_defined());
        assert!(!v("01x1").is_fully_defined());
        assert!(v("xxxx").is_unknown());
        assert!(v("0E00").is_error());
        assert!(!Value::NIL.is_fully_defined());
        assert_eq!(v("1010").to_u64(), Some(10));
        assert_eq!(v("10x0").to_u64(), None);
    }

    #[test]
    fn test_extract_and_concat() {
        let x = v("1100x0E1");
        assert_eq!(x.extract(0, 4), v("x0E1"));
        assert_eq!(x.extract(4, 4), v("1100"));
        assert_eq!(x.extract(6, 4), v("EE11"));
        assert_eq!(v("x0E1").concat(v("1100")), x);
    }

    #[test]
    fn test_get_set() {
        let x = v("0000");
        let y = x.set(2, Value::TRUE).set(0, Value::UNKNOWN);
        assert_eq!(y, v("010x"));
        assert_eq!(y.get(2), Value::TRUE);
        assert_eq!(y.get(7), Value::ERROR);
    }

    #[test]
    fn test_extend_width() {
        assert_eq!(v("10").extend_width(w(4), Value::TRUE), v("1110"));
        assert_eq!(v("10").extend_width(w(4), Value::UNKNOWN), v("xx10"));
        assert_eq!(v("10").extend_width(w(3), Value::ERROR), v("E10"));
    }

    #[test]
    fn test_display() {
        assert_eq!(v("10x1E").to_string(), "1 0x1E");
        assert_eq!(Value::NIL.to_string(), "-");
        assert_eq!(Value::known(w(12), 0xA5F).to_hex_string(), "a5f");
        assert_eq!(v("1x0000").to_hex_string(), "x0");
    }

    fn any_value(width: u32) -> impl Strategy<Value = Value> {
        (any::<u64>(), any::<u64>(), any::<u64>())
            .prop_map(move |(e, u, b)| Value::create(width, e & (u & b), u & !b, b))
    }

    proptest! {
        #[test]
        fn prop_combine_commutative(a in any_value(16), b in any_value(16)) {
            prop_assert_eq!(a.combine(b), b.combine(a));
        }

        #[test]
        fn prop_combine_with_unknown_is_identity(a in any_value(16)) {
            prop_assert_eq!(a.combine(Value::unknown(w(16))), a);
        }

        #[test]
        fn prop_double_not(a in any_value(24)) {
            prop_assert_eq!(a.not().not(), a);
        }

        #[test]
        fn prop_lane_split_rejoins(a in any_value(12)) {
            let lanes = a.to_bits();
            prop_assert_eq!(Value::from_bits(&lanes), a);
            prop_assert_eq!(a.extract(0, 5).concat(a.extract(5, 7)), a);
        }
    }
}
