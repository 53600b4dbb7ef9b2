//! Index of what touches each connection point.

use std::collections::{BTreeMap, BTreeSet};

use super::component::Component;
use super::types::{ComponentId, Location, WidthIncompatibility, Wire};
use crate::value::BitWidth;

/// Component ends and wire endpoints by location, plus the width each point
/// is expected to carry.
#[derive(Debug, Clone, Default)]
pub struct PointIndex {
    ends: BTreeMap<Location, Vec<(ComponentId, usize)>>,
    widths: BTreeMap<Location, BitWidth>,
    wires: BTreeMap<Location, Vec<Wire>>,
    incompatibilities: Vec<WidthIncompatibility>,
}

impl PointIndex {
    /// Index a set of components and wires.
    ///
    /// The width of a point is fixed by the first component end (in id order)
    /// that declares one; later ends that disagree are reported.
    pub fn build<'a>(
        components: impl IntoIterator<Item = &'a Component>,
        wires: impl IntoIterator<Item = &'a Wire>,
    ) -> Self {
        let mut index = Self::default();
        let mut conflicts: BTreeMap<Location, WidthIncompatibility> = BTreeMap::new();

        for comp in components {
            for (port, end) in comp.ends().iter().enumerate() {
                index.ends.entry(end.location).or_default().push((comp.id(), port));
                if end.width.is_unknown() {
                    continue;
                }
                match index.widths.get(&end.location) {
                    None => {
                        index.widths.insert(end.location, end.width);
                    }
                    Some(&known) if known != end.width => {
                        conflicts
                            .entry(end.location)
                            .or_insert_with(|| {
                                WidthIncompatibility::new((end.location, known), (end.location, end.width))
                            })
                            .add(end.location, end.width);
                    }
                    Some(_) => {}
                }
            }
        }
        for wire in wires {
            for loc in wire.ends() {
                index.wires.entry(loc).or_default().push(*wire);
            }
        }
        index.incompatibilities = conflicts.into_values().collect();
        index
    }

    /// Component ends at `loc` as `(component, port)` pairs.
    pub fn ends_at(&self, loc: Location) -> &[(ComponentId, usize)] {
        self.ends.get(&loc).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Wires with an endpoint at `loc`.
    pub fn wires_at(&self, loc: Location) -> &[Wire] {
        self.wires.get(&loc).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Width declared at `loc`, or unknown.
    pub fn width_at(&self, loc: Location) -> BitWidth {
        self.widths.get(&loc).copied().unwrap_or(BitWidth::UNKNOWN)
    }

    /// Every indexed location.
    pub fn locations(&self) -> BTreeSet<Location> {
        self.ends.keys().chain(self.wires.keys()).copied().collect()
    }

    /// Points where component ends disagree on width.
    pub fn incompatibilities(&self) -> &[WidthIncompatibility] {
        &self.incompatibilities
    }
}
