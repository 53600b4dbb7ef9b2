//! # Gatesim Core
//!
//! A hierarchical digital logic simulation engine.
//!
//! This library provides:
//! - Four-state multi-bit logic [`Value`]s
//! - Circuit templates built from components, wires and subcircuit instances
//! - Transactional editing with undo and per-circuit locking
//! - An event-driven propagator that settles a circuit hierarchy to a fixed
//!   point and detects oscillation
//! - A threaded simulator shell with a clock ticker
//!
//! ## Architecture
//!
//! - [`value`] - Logic values and bit widths
//! - [`circuit`] - Components, wires, circuits and their derived nets
//! - [`components`] - Built-in component kinds and the factory table
//! - [`edit`] - Transactions, replacement maps and circuit locking
//! - [`project`] - Circuit registry and the transaction entry point
//! - [`sim`] - Circuit states, the propagator and the simulator
//! - [`demos`] - Small ready-made circuits
//!
//! ## Usage
//!
//! ```
//! use gatesim_core::{AttributeSet, Project, SimulatorConfig, Value};
//!
//! let project = Project::new(SimulatorConfig::default())?;
//! let circuit = project.add_circuit("inverter");
//! let mut builder = project.builder(&circuit);
//! builder.component("Pin", (0, 0), AttributeSet::new().with("label", "a"))?;
//! builder.component("NOT Gate", (60, 0), AttributeSet::new())?;
//! builder.component(
//!     "Pin",
//!     (60, 0),
//!     AttributeSet::new().with("label", "y").with("output", true),
//! )?;
//! builder.wire((0, 0), (30, 0))?;
//! builder.commit()?;
//!
//! let mut propagator = project.new_propagator(&circuit);
//! propagator.poke_pin_named("a", Value::TRUE)?;
//! propagator.propagate()?;
//! assert_eq!(propagator.value((60, 0).into()), Value::FALSE);
//! # Ok::<(), gatesim_core::SimError>(())
//! ```
//!
//! ## Propagation Model
//!
//! Each circuit state keeps the value every component drives at every point.
//! A step re-evaluates the components marked dirty, then resolves the dirty
//! points through their nets; components touching a point whose value changed
//! become dirty for the next step. Outputs with a delay wait for a later clock
//! tick. A settle that has not quiesced after the configured number of steps
//! is reported as oscillating.

pub mod circuit;
pub mod components;
pub mod demos;
pub mod edit;
pub mod error;
pub mod listeners;
pub mod project;
pub mod sim;
pub mod value;

// Re-export main types for convenience
pub use circuit::{AttrValue, AttributeSet, Circuit, CircuitId, Component, ComponentId, Location, Structure, Wire};
pub use edit::{CircuitChange, ReplacementMap, Transaction, TransactionResult};
pub use error::{Result, SimError};
pub use project::{CircuitBuilder, Project};
pub use sim::{Propagation, Propagator, Simulator, SimulatorConfig, SimulatorEvent, StateId};
pub use value::{BitWidth, Value};
