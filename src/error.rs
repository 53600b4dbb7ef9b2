//! Error types for the gatesim engine.
//!
//! This module provides a unified error type [`SimError`] covering the
//! conditions that can be reported to a caller: malformed component
//! definitions, bad edits, faults raised by component hooks, and invalid
//! configuration.
//!
//! Data-level conditions of an in-progress design (width conflicts, driver
//! conflicts, oscillation) are *not* errors. They are carried as values and
//! flags so that they can be displayed.

use thiserror::Error;

use crate::circuit::{CircuitId, ComponentId};

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Unified error type for all gatesim operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    // ============ Value Errors ============
    /// Bit width outside the representable range
    #[error("Invalid bit width {width} (must be between 1 and {max})")]
    InvalidWidth { width: u32, max: u32 },

    // ============ Component Definition Errors ============
    /// No factory registered under this name
    #[error("Unknown component factory '{name}'")]
    UnknownFactory { name: String },

    /// Attribute missing, mistyped or out of range
    #[error("Invalid attribute '{attr}' for component '{component}': {message}")]
    InvalidAttribute {
        component: String,
        attr: String,
        message: String,
    },

    /// A circuit would (transitively) contain itself
    #[error("Circuit '{circuit}' cannot contain itself as a subcircuit")]
    RecursiveSubcircuit { circuit: String },

    // ============ Edit Errors ============
    /// Circuit not registered with the project
    #[error("Circuit {circuit} not found")]
    CircuitNotFound { circuit: CircuitId },

    /// Component not present in the named circuit
    #[error("Component {component} not found in circuit {circuit}")]
    ComponentNotFound {
        circuit: CircuitId,
        component: ComponentId,
    },

    /// Degenerate wire
    #[error("Wire endpoints must differ (both at {location})")]
    ZeroLengthWire { location: String },

    /// Circuit is still used as a subcircuit somewhere
    #[error("Circuit '{circuit}' is still in use by {users} other circuit(s)")]
    CircuitInUse { circuit: String, users: usize },

    // ============ Simulation Errors ============
    /// Port index does not exist on the component
    #[error("Port {port} out of range for component {component} ({count} ports)")]
    PortOutOfRange {
        component: ComponentId,
        port: usize,
        count: usize,
    },

    /// A component hook failed during a pass
    #[error("Component {component} ({kind}) faulted: {message}")]
    ComponentFault {
        component: ComponentId,
        kind: String,
        message: String,
    },

    /// Simulation state requested for a component that has none
    #[error("Component {component} is not a {expected}")]
    WrongComponentKind {
        component: ComponentId,
        expected: &'static str,
    },

    /// Invalid simulation configuration
    #[error("Invalid simulation configuration: {message}")]
    InvalidConfig { message: String },

    /// Background threads are gone
    #[error("Simulator has been shut down")]
    ShutDown,
}

impl SimError {
    /// Create an invalid attribute error
    pub fn invalid_attribute(
        component: impl Into<String>,
        attr: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidAttribute {
            component: component.into(),
            attr: attr.into(),
            message: message.into(),
        }
    }

    /// Create a component fault error
    pub fn fault(component: ComponentId, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ComponentFault {
            component,
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}
