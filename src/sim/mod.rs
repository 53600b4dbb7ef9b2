//! Simulation engine.
//!
//! - [`CircuitState`]: values, drivers and dirty sets of one circuit instance
//! - [`InstanceState`]: what a component sees while it propagates
//! - [`Propagator`]: settles a tree of states to a fixed point
//! - [`Simulator`]: runs a propagator on worker and ticker threads

mod instance;
mod propagator;
mod simulator;
mod state;
mod ticker;

pub use instance::InstanceState;
pub use propagator::{Propagation, Propagator};
pub use simulator::{
    Simulator, SimulatorConfig, SimulatorEvent, DEFAULT_MAX_BUS_WIDTH, DEFAULT_OSCILLATION_BOUND,
    DEFAULT_TICK_FREQUENCY,
};
pub use state::{CircuitState, StateId};
pub use ticker::{tick_schedule, MAX_PENDING_TICKS};
