//! Individual circuit edits.

use crate::circuit::{AttrValue, Circuit, Component, ComponentId, Wire};

use super::replacement::ReplacementMap;

/// One edit of one circuit.
#[derive(Debug, Clone)]
pub enum CircuitChange {
    /// Place a component
    Add { circuit: Circuit, component: Component },
    /// Remove a component
    Remove { circuit: Circuit, component: ComponentId },
    AddWire { circuit: Circuit, wire: Wire },
    RemoveWire { circuit: Circuit, wire: Wire },
    /// Swap components for others in one step; data of a removed component
    /// follows a replacement of the same kind
    Replace {
        circuit: Circuit,
        removed: Vec<ComponentId>,
        added: Vec<Component>,
    },
    /// Set (`Some`) or clear (`None`) one component attribute
    SetAttribute {
        circuit: Circuit,
        component: ComponentId,
        key: String,
        value: Option<AttrValue>,
    },
    /// Set or clear an attribute of the circuit itself
    SetCircuitAttribute {
        circuit: Circuit,
        key: String,
        value: Option<AttrValue>,
    },
    /// Remove every component and wire
    Clear { circuit: Circuit },
}

impl CircuitChange {
    pub fn circuit(&self) -> &Circuit {
        match self {
            CircuitChange::Add { circuit, .. }
            | CircuitChange::Remove { circuit, .. }
            | CircuitChange::AddWire { circuit, .. }
            | CircuitChange::RemoveWire { circuit, .. }
            | CircuitChange::Replace { circuit, .. }
            | CircuitChange::SetAttribute { circuit, .. }
            | CircuitChange::SetCircuitAttribute { circuit, .. }
            | CircuitChange::Clear { circuit } => circuit,
        }
    }

    /// Templates of subcircuit instances this change places.
    pub(crate) fn placed_templates(&self) -> Vec<Circuit> {
        let placed: &[Component] = match self {
            CircuitChange::Add { component, .. } => std::slice::from_ref(component),
            CircuitChange::Replace { added, .. } => added,
            _ => &[],
        };
        placed
            .iter()
            .filter_map(|c| c.kind().as_subcircuit().map(|s| s.circuit().clone()))
            .collect()
    }
}

/// An edit as it was applied, with everything needed to undo it.
#[derive(Debug, Clone)]
pub(crate) enum AppliedChange {
    Added(Circuit, Component),
    Removed(Circuit, Component),
    WireAdded(Circuit, Wire),
    WireRemoved(Circuit, Wire),
    Replaced {
        circuit: Circuit,
        removed: Vec<Component>,
        added: Vec<Component>,
        map: ReplacementMap,
    },
    AttributeSet {
        circuit: Circuit,
        component: ComponentId,
        key: String,
        old: Option<AttrValue>,
        new: Option<AttrValue>,
    },
    CircuitAttributeSet {
        circuit: Circuit,
        key: String,
        old: Option<AttrValue>,
        new: Option<AttrValue>,
    },
    Cleared {
        circuit: Circuit,
        components: Vec<Component>,
        wires: Vec<Wire>,
    },
}

impl AppliedChange {
    /// Changes that undo this one, in the order they must run.
    pub(crate) fn reverse(&self) -> Vec<CircuitChange> {
        match self {
            AppliedChange::Added(circuit, component) => vec![CircuitChange::Remove {
                circuit: circuit.clone(),
                component: component.id(),
            }],
            AppliedChange::Removed(circuit, component) => vec![CircuitChange::Add {
                circuit: circuit.clone(),
                component: component.clone(),
            }],
            AppliedChange::WireAdded(circuit, wire) => vec![CircuitChange::RemoveWire {
                circuit: circuit.clone(),
                wire: *wire,
            }],
            AppliedChange::WireRemoved(circuit, wire) => vec![CircuitChange::AddWire {
                circuit: circuit.clone(),
                wire: *wire,
            }],
            AppliedChange::Replaced {
                circuit,
                removed,
                added,
                ..
            } => vec![CircuitChange::Replace {
                circuit: circuit.clone(),
                removed: added.iter().map(Component::id).collect(),
                added: removed.clone(),
            }],
            AppliedChange::AttributeSet {
                circuit,
                component,
                key,
                old,
                ..
            } => vec![CircuitChange::SetAttribute {
                circuit: circuit.clone(),
                component: *component,
                key: key.clone(),
                value: old.clone(),
            }],
            AppliedChange::CircuitAttributeSet { circuit, key, old, .. } => {
                vec![CircuitChange::SetCircuitAttribute {
                    circuit: circuit.clone(),
                    key: key.clone(),
                    value: old.clone(),
                }]
            }
            AppliedChange::Cleared {
                circuit,
                components,
                wires,
            } => components
                .iter()
                .map(|c| CircuitChange::Add {
                    circuit: circuit.clone(),
                    component: c.clone(),
                })
                .chain(wires.iter().map(|w| CircuitChange::AddWire {
                    circuit: circuit.clone(),
                    wire: *w,
                }))
                .collect(),
        }
    }
}
