//! Bus splitters.
//!
//! A splitter joins a combined bus (end 0) to `fanout` split ends. Each bit
//! of the combined bus is assigned to one split end, or to none. The net
//! resolver uses the assignment to thread individual bits between nets; the
//! splitter itself never computes anything.

use crate::circuit::{AttributeSet, Direction, EndData, Location};
use crate::error::{Result, SimError};
use crate::value::BitWidth;

use super::{ComponentKind, FactoryContext, FactoryTable};

pub(crate) const SPLITTER: &str = "Splitter";

/// Largest fanout a splitter may declare.
pub const MAX_FANOUT: i64 = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Splitter {
    width: BitWidth,
    fanout: usize,
    /// For each combined bit: 0 for unmapped, otherwise the split end (1-based)
    bit_end: Vec<u8>,
    /// For each combined bit: its lane within the split end
    bit_lane: Vec<u32>,
    end_widths: Vec<u32>,
}

impl Splitter {
    /// Create a splitter from an explicit lane table.
    pub fn new(width: BitWidth, fanout: usize, bit_end: Vec<u8>) -> Result<Self> {
        if bit_end.len() != width.bits() as usize {
            return Err(SimError::invalid_attribute(
                SPLITTER,
                "bit_end",
                format!("{} entries for a {}-bit bus", bit_end.len(), width),
            ));
        }
        if let Some(bad) = bit_end.iter().find(|&&e| e as usize > fanout) {
            return Err(SimError::invalid_attribute(
                SPLITTER,
                "bit_end",
                format!("end {} does not exist with fanout {}", bad, fanout),
            ));
        }
        let mut end_widths = vec![0u32; fanout + 1];
        let mut bit_lane = Vec::with_capacity(bit_end.len());
        for &end in &bit_end {
            bit_lane.push(end_widths[end as usize]);
            end_widths[end as usize] += 1;
        }
        Ok(Self {
            width,
            fanout,
            bit_end,
            bit_lane,
            end_widths,
        })
    }

    /// Contiguous default assignment: lower bits go to lower ends, with the
    /// first `width % fanout` ends taking one extra bit.
    pub fn default_lanes(width: BitWidth, fanout: usize) -> Vec<u8> {
        let w = width.bits() as usize;
        let fanout = fanout.max(1);
        let (base, extra) = (w / fanout, w % fanout);
        let mut lanes = Vec::with_capacity(w);
        for end in 0..fanout {
            let n = base + usize::from(end < extra);
            lanes.extend(std::iter::repeat((end + 1) as u8).take(n));
        }
        lanes
    }

    /// Create from `incoming`, `fanout` and optional `bit_end` attributes.
    pub fn from_attrs(attrs: &AttributeSet, ctx: &FactoryContext) -> Result<Self> {
        let width = attrs.width(SPLITTER, "incoming", 2, ctx.max_width)?;
        let fanout = attrs.int_in(SPLITTER, "fanout", 2, 1, MAX_FANOUT)? as usize;
        let lanes = match attrs.bits(SPLITTER, "bit_end")? {
            Some(lanes) => lanes,
            None => Self::default_lanes(width, fanout),
        };
        Self::new(width, fanout, lanes)
    }

    pub fn width(&self) -> BitWidth {
        self.width
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    /// Split end (1-based) carrying combined bit `bit`, if any.
    pub fn end_of(&self, bit: u32) -> Option<usize> {
        match self.bit_end.get(bit as usize) {
            Some(0) | None => None,
            Some(&end) => Some(end as usize),
        }
    }

    /// Lane of combined bit `bit` within its split end.
    pub fn lane_of(&self, bit: u32) -> u32 {
        self.bit_lane.get(bit as usize).copied().unwrap_or(0)
    }

    /// Width of split end `end` (1-based). Unused ends have unknown width.
    pub fn end_width(&self, end: usize) -> BitWidth {
        self.end_widths
            .get(end)
            .and_then(|&w| BitWidth::new(w).ok())
            .unwrap_or(BitWidth::UNKNOWN)
    }

    pub fn ends(&self, at: Location) -> Vec<EndData> {
        let mut ends = Vec::with_capacity(self.fanout + 1);
        ends.push(EndData::new(at, self.width, Direction::InOut));
        for end in 1..=self.fanout {
            ends.push(EndData::new(
                at.translate(20, 10 * end as i32),
                self.end_width(end),
                Direction::InOut,
            ));
        }
        ends
    }
}

pub(crate) fn register(table: &mut FactoryTable) {
    table.register(SPLITTER, |attrs, ctx| {
        Splitter::from_attrs(attrs, ctx).map(ComponentKind::Splitter)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(n: u32) -> BitWidth {
        BitWidth::new(n).unwrap()
    }

    #[test]
    fn test_default_lanes() {
        assert_eq!(Splitter::default_lanes(w(4), 2), vec![1, 1, 2, 2]);
        assert_eq!(Splitter::default_lanes(w(5), 2), vec![1, 1, 1, 2, 2]);
        assert_eq!(Splitter::default_lanes(w(2), 3), vec![1, 2]);
    }

    #[test]
    fn test_lane_mapping() {
        let s = Splitter::new(w(4), 2, vec![2, 1, 2, 0]).unwrap();
        assert_eq!(s.end_of(0), Some(2));
        assert_eq!(s.end_of(3), None);
        assert_eq!(s.lane_of(2), 1);
        assert_eq!(s.end_width(1).bits(), 1);
        assert_eq!(s.end_width(2).bits(), 2);
        let ends = s.ends(Location::new(0, 0));
        assert_eq!(ends.len(), 3);
        assert_eq!(ends[2].location, Location::new(20, 20));
    }

    #[test]
    fn test_bad_lane_table() {
        assert!(Splitter::new(w(4), 2, vec![1, 1, 2]).is_err());
        assert!(Splitter::new(w(2), 2, vec![1, 3]).is_err());
        let unused = Splitter::new(w(2), 3, vec![1, 2]).unwrap();
        assert!(unused.end_width(3).is_unknown());
    }
}
