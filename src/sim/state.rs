//! Runtime state of one circuit instance.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::circuit::{Circuit, ComponentId, Location, Structure, ThreadValues};
use crate::components::ComponentData;
use crate::value::Value;

slotmap::new_key_type! {
    /// Key of a [`CircuitState`] in its propagator's arena.
    pub struct StateId;
}

/// What a circuit state keeps per component.
#[derive(Debug, Clone)]
pub(crate) enum ComponentSlot {
    Data(Box<dyn ComponentData>),
    /// State of the circuit instantiated by a subcircuit component
    Substate(StateId),
}

/// Values, drivers and dirty sets of one instantiation of a circuit.
///
/// States form a tree mirroring subcircuit nesting. A state whose subcircuit
/// instance was removed is detached (no parent) but kept, so the instance
/// can pick it up again if it comes back.
#[derive(Debug, Clone)]
pub struct CircuitState {
    pub(super) circuit: Circuit,
    pub(super) structure: Arc<Structure>,
    pub(super) parent: Option<(StateId, ComponentId)>,
    pub(super) children: BTreeMap<ComponentId, StateId>,
    pub(super) values: HashMap<Location, Value>,
    pub(super) causes: HashMap<Location, Vec<(ComponentId, Value)>>,
    pub(super) data: HashMap<ComponentId, ComponentSlot>,
    pub(super) dirty_components: BTreeSet<ComponentId>,
    pub(super) dirty_points: BTreeSet<Location>,
    pub(super) threads: ThreadValues,
}

impl CircuitState {
    pub(super) fn new(circuit: &Circuit, parent: Option<(StateId, ComponentId)>) -> Self {
        let mut state = Self {
            circuit: circuit.clone(),
            structure: circuit.snapshot(),
            parent,
            children: BTreeMap::new(),
            values: HashMap::new(),
            causes: HashMap::new(),
            data: HashMap::new(),
            dirty_components: BTreeSet::new(),
            dirty_points: BTreeSet::new(),
            threads: ThreadValues::default(),
        };
        state.mark_all_dirty();
        state
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    /// The structure this state currently simulates.
    pub fn structure(&self) -> &Arc<Structure> {
        &self.structure
    }

    /// Parent state and the subcircuit component that instantiates this one.
    pub fn parent(&self) -> Option<(StateId, ComponentId)> {
        self.parent
    }

    /// Attached child state of a subcircuit component.
    pub fn child(&self, component: ComponentId) -> Option<StateId> {
        self.children.get(&component).copied()
    }

    /// Attached children in component order.
    pub fn children(&self) -> impl Iterator<Item = (ComponentId, StateId)> + '_ {
        self.children.iter().map(|(c, s)| (*c, *s))
    }

    /// Settled value at a point; unknown of the point's width if nothing
    /// has been stored there.
    pub fn value(&self, loc: Location) -> Value {
        match self.values.get(&loc) {
            Some(v) => *v,
            None => {
                let width = self.structure.width_at(loc);
                if width.is_unknown() {
                    Value::NIL
                } else {
                    Value::unknown(width)
                }
            }
        }
    }

    /// Combined value every component drives at a point (NIL for none).
    pub fn cause_value(&self, loc: Location) -> Value {
        combined(&self.causes, loc)
    }

    /// Per-component data of a given type.
    pub fn component_data<T: Any>(&self, component: ComponentId) -> Option<&T> {
        match self.data.get(&component) {
            Some(ComponentSlot::Data(d)) => (**d).as_any().downcast_ref(),
            _ => None,
        }
    }

    /// Replace a component's data.
    pub fn set_component_data<T: ComponentData>(&mut self, component: ComponentId, data: T) {
        self.data.insert(component, ComponentSlot::Data(Box::new(data)));
    }

    pub fn mark_component_dirty(&mut self, component: ComponentId) {
        self.dirty_components.insert(component);
    }

    pub fn mark_point_dirty(&mut self, loc: Location) {
        self.dirty_points.insert(loc);
    }

    /// Queue every component for re-evaluation.
    pub fn mark_all_dirty(&mut self) {
        let ids: Vec<ComponentId> = self.structure.components().map(|c| c.id()).collect();
        self.dirty_components.extend(ids);
    }

    /// Check if anything is waiting to be processed.
    pub fn is_dirty(&self) -> bool {
        !self.dirty_components.is_empty() || !self.dirty_points.is_empty()
    }

    /// Record what `component` drives at `loc`. Returns true if the combined
    /// value there changed.
    pub(super) fn set_cause(&mut self, loc: Location, component: ComponentId, value: Value) -> bool {
        let before = self.cause_value(loc);
        let list = self.causes.entry(loc).or_default();
        match list.iter_mut().find(|(c, _)| *c == component) {
            Some(entry) => entry.1 = value,
            None if value.is_nil() => {}
            None => list.push((component, value)),
        }
        list.retain(|(_, v)| !v.is_nil());
        if list.is_empty() {
            self.causes.remove(&loc);
        }
        self.cause_value(loc) != before
    }

    /// Forget what `component` drives at `loc`.
    pub(super) fn remove_cause(&mut self, loc: Location, component: ComponentId) -> bool {
        self.set_cause(loc, component, Value::NIL)
    }

    /// Run the net resolver over the dirty points. Returns the points whose
    /// value changed.
    pub(super) fn settle_points(&mut self) -> Vec<Location> {
        let dirty = std::mem::take(&mut self.dirty_points);
        let structure = self.structure.clone();
        let causes = &self.causes;
        let assignments = structure
            .nets()
            .propagate(structure.points(), &mut self.threads, &dirty, |loc| combined(causes, loc));

        let mut changed = Vec::new();
        for (loc, value) in assignments {
            if self.store_value(&structure, loc, value) {
                changed.push(loc);
            }
        }
        changed
    }

    fn store_value(&mut self, structure: &Structure, loc: Location, value: Value) -> bool {
        let old = if value.is_nil() {
            self.values.remove(&loc)
        } else {
            self.values.insert(loc, value)
        };
        let unchanged = match old {
            Some(old) => old == value,
            None => value.is_nil(),
        };
        if unchanged {
            return false;
        }
        for &(id, _) in structure.points().ends_at(loc) {
            if structure.component(id).is_some_and(|c| c.kind().as_splitter().is_none()) {
                self.dirty_components.insert(id);
            }
        }
        true
    }

    /// Clear values, drivers and per-component data (child states are kept)
    /// and queue every component.
    pub(super) fn reset(&mut self) {
        self.values.clear();
        self.causes.clear();
        self.data.retain(|_, slot| matches!(slot, ComponentSlot::Substate(_)));
        self.dirty_points.clear();
        self.dirty_components.clear();
        self.threads.invalidate();
        self.mark_all_dirty();
    }
}

fn combined(causes: &HashMap<Location, Vec<(ComponentId, Value)>>, loc: Location) -> Value {
    causes
        .get(&loc)
        .map(|list| list.iter().fold(Value::NIL, |acc, (_, v)| acc.combine(*v)))
        .unwrap_or(Value::NIL)
}
