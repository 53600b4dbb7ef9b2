//! Circuit validation.
//!
//! Problems found here never stop a simulation: conflicting widths read as
//! error values and floating inputs read as unknown. They are reported so
//! a front end can point at them.

use std::fmt;

use super::graph::Structure;
use super::types::{ComponentId, Location, WidthIncompatibility};

/// A suspicious spot in a circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    /// Points that should share a width but do not
    WidthConflict(WidthIncompatibility),
    /// An input end that nothing else touches
    FloatingInput {
        component: ComponentId,
        port: usize,
        location: Location,
    },
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::WidthConflict(conflict) => {
                write!(f, "incompatible widths:")?;
                for (loc, width) in &conflict.points {
                    write!(f, " {}@{}", width, loc)?;
                }
                Ok(())
            }
            Issue::FloatingInput {
                component,
                port,
                location,
            } => write!(f, "input {} of {} at {} is not connected", port, component, location),
        }
    }
}

/// Check a committed structure.
///
/// Checks:
/// - Component ends and nets agree on widths
/// - Every input end shares its point with a wire or another component
pub fn validate_structure(structure: &Structure) -> Vec<Issue> {
    let mut issues: Vec<Issue> = structure
        .width_incompatibilities()
        .into_iter()
        .map(Issue::WidthConflict)
        .collect();

    for comp in structure.components() {
        for (port, end) in comp.ends().iter().enumerate() {
            if end.direction.is_output() {
                continue;
            }
            let points = structure.points();
            let shared = points.ends_at(end.location).iter().any(|(id, _)| *id != comp.id());
            if !shared && points.wires_at(end.location).is_empty() {
                issues.push(Issue::FloatingInput {
                    component: comp.id(),
                    port,
                    location: end.location,
                });
            }
        }
    }
    issues
}
