//! Circuit representation.
//!
//! This module provides the structural side of a design: placed
//! [`Component`]s, [`Wire`]s, the [`Circuit`] template that holds them, and
//! the derived views the simulator reads: the [`PointIndex`] of what touches
//! each location and the [`NetMap`] of nets and bit threads.

mod attrs;
mod component;
mod graph;
mod nets;
mod points;
mod types;
mod validate;

pub use attrs::{AttrValue, AttributeSet};
pub use component::Component;
pub(crate) use graph::CircuitBody;
pub use graph::{Circuit, CircuitEvent, PortInfo, Structure};
pub use nets::{Net, NetMap, Thread, ThreadValues};
pub use points::PointIndex;
pub use types::*;
pub use validate::{validate_structure, Issue};
