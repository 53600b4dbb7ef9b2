//! Core types for circuit representation.

use std::fmt;

use crate::error::{Result, SimError};
use crate::value::BitWidth;

/// A grid coordinate identifying a connection point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Location {
    pub x: i32,
    pub y: i32,
}

impl Location {
    /// Create a location.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// This location shifted by `(dx, dy)`. Wraps at the edge of the grid.
    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self::new(self.x.wrapping_add(dx), self.y.wrapping_add(dy))
    }

    /// This location shifted by another location treated as an offset.
    pub fn offset_by(&self, offset: Location) -> Self {
        self.translate(offset.x, offset.y)
    }
}

impl From<(i32, i32)> for Location {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x, y)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// A stable identifier for a component instance.
///
/// Identifiers are handed out by a [`Project`](crate::Project) counter or
/// supplied by the caller; they are never reused within one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u64);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// A stable identifier for a circuit template.
///
/// Circuit locks are always acquired in ascending `CircuitId` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CircuitId(pub u64);

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circuit#{}", self.0)
    }
}

/// Signal direction of a component end, seen from the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Reads the net
    Input,
    /// Drives the net
    Output,
    /// Both reads and drives
    InOut,
}

impl Direction {
    /// Check if the end may drive a value.
    pub fn is_output(&self) -> bool {
        matches!(self, Direction::Output | Direction::InOut)
    }

    /// Check if the end reads its net.
    pub fn is_input(&self) -> bool {
        matches!(self, Direction::Input | Direction::InOut)
    }
}

/// One connection point of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EndData {
    pub location: Location,
    pub width: BitWidth,
    pub direction: Direction,
}

impl EndData {
    /// Create an end.
    pub fn new(location: Location, width: BitWidth, direction: Direction) -> Self {
        Self {
            location,
            width,
            direction,
        }
    }

    /// An input end.
    pub fn input(location: Location, width: BitWidth) -> Self {
        Self::new(location, width, Direction::Input)
    }

    /// An output end.
    pub fn output(location: Location, width: BitWidth) -> Self {
        Self::new(location, width, Direction::Output)
    }
}

/// A two-terminal connector. Endpoints are stored in sorted order so that
/// `Wire::new(a, b) == Wire::new(b, a)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Wire {
    e0: Location,
    e1: Location,
}

impl Wire {
    /// Create a wire between two distinct locations.
    pub fn new(a: impl Into<Location>, b: impl Into<Location>) -> Result<Self> {
        let (a, b) = (a.into(), b.into());
        if a == b {
            return Err(SimError::ZeroLengthWire {
                location: a.to_string(),
            });
        }
        let (e0, e1) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self { e0, e1 })
    }

    /// First (smaller) endpoint.
    pub fn end0(&self) -> Location {
        self.e0
    }

    /// Second (larger) endpoint.
    pub fn end1(&self) -> Location {
        self.e1
    }

    /// Both endpoints.
    pub fn ends(&self) -> [Location; 2] {
        [self.e0, self.e1]
    }
}

impl fmt::Display for Wire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire{}-{}", self.e0, self.e1)
    }
}

/// Two or more connection points that should share a width but do not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidthIncompatibility {
    /// Each conflicting point with the width found there
    pub points: Vec<(Location, BitWidth)>,
}

impl WidthIncompatibility {
    pub(crate) fn new(first: (Location, BitWidth), second: (Location, BitWidth)) -> Self {
        Self {
            points: vec![first, second],
        }
    }

    pub(crate) fn add(&mut self, location: Location, width: BitWidth) {
        if !self.points.contains(&(location, width)) {
            self.points.push((location, width));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_normalized() {
        let a = Wire::new((10, 0), (0, 0)).unwrap();
        let b = Wire::new((0, 0), (10, 0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.end0(), Location::new(0, 0));
        assert!(Wire::new((3, 3), (3, 3)).is_err());
    }

    #[test]
    fn test_translate_wraps_at_grid_edge() {
        let edge = Location::new(i32::MAX - 5, i32::MIN + 5);
        assert_eq!(edge.translate(20, -10), Location::new(i32::MIN + 14, i32::MAX - 4));
        assert_eq!(Location::new(0, 0).offset_by(Location::new(30, -10)), Location::new(30, -10));
    }

    #[test]
    fn test_direction() {
        assert!(Direction::InOut.is_input() && Direction::InOut.is_output());
        assert!(!Direction::Input.is_output());
    }
}
