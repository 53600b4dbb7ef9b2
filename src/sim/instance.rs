//! The view a component gets of its circuit state while it runs.

use std::any::Any;

use crate::circuit::{AttributeSet, Circuit, Component, ComponentId, EndData, Location};
use crate::components::{ComponentData, PinState};
use crate::error::{Result, SimError};
use crate::value::Value;

use super::propagator::Propagator;
use super::state::{ComponentSlot, StateId};

/// Context handed to [`ComponentKind::propagate`](crate::components::ComponentKind::propagate)
/// and tick hooks: port values, output scheduling, and the component's own
/// per-state data.
pub struct InstanceState<'a> {
    prop: &'a mut Propagator,
    state: StateId,
    component: &'a Component,
}

impl<'a> InstanceState<'a> {
    pub(super) fn new(prop: &'a mut Propagator, state: StateId, component: &'a Component) -> Self {
        Self {
            prop,
            state,
            component,
        }
    }

    pub fn component(&self) -> &Component {
        self.component
    }

    pub fn id(&self) -> ComponentId {
        self.component.id()
    }

    pub fn attrs(&self) -> &AttributeSet {
        self.component.attrs()
    }

    /// State this component runs in.
    pub fn state_id(&self) -> StateId {
        self.state
    }

    /// Current simulation tick.
    pub fn tick_count(&self) -> u64 {
        self.prop.clock()
    }

    pub fn port_count(&self) -> usize {
        self.component.ends().len()
    }

    fn end(&self, port: usize) -> Result<&EndData> {
        self.component.end(port).ok_or(SimError::PortOutOfRange {
            component: self.component.id(),
            port,
            count: self.component.ends().len(),
        })
    }

    /// Value currently on a port's point.
    pub fn port_value(&self, port: usize) -> Result<Value> {
        let loc = self.end(port)?.location;
        Ok(self.prop.states[self.state].value(loc))
    }

    /// Drive a value onto a port after `delay` ticks (0 = within this pass).
    pub fn set_port(&mut self, port: usize, value: Value, delay: u32) -> Result<()> {
        let loc = self.end(port)?.location;
        self.prop
            .set_value(self.state, loc, value, self.component.id(), delay);
        Ok(())
    }

    /// This component's data, if it has data of type `T`.
    pub fn data<T: Any>(&self) -> Option<&T> {
        self.prop.states[self.state].component_data(self.component.id())
    }

    /// Mutable access to this component's data of type `T`.
    pub fn data_mut<T: Any>(&mut self) -> Option<&mut T> {
        match self.prop.states[self.state].data.get_mut(&self.component.id()) {
            Some(ComponentSlot::Data(d)) => (**d).as_any_mut().downcast_mut(),
            _ => None,
        }
    }

    /// This component's data, created with `init` if missing or of another
    /// type.
    pub fn data_or_insert_with<T: ComponentData>(&mut self, init: impl FnOnce() -> T) -> Result<&mut T> {
        let id = self.component.id();
        let node = &mut self.prop.states[self.state];
        let present = matches!(
            node.data.get(&id),
            Some(ComponentSlot::Data(d)) if (**d).as_any().is::<T>()
        );
        if !present {
            node.data.insert(id, ComponentSlot::Data(Box::new(init())));
        }
        let data = match node.data.get_mut(&id) {
            Some(ComponentSlot::Data(d)) => (**d).as_any_mut().downcast_mut::<T>(),
            _ => None,
        };
        data.ok_or(SimError::WrongComponentKind {
            component: id,
            expected: std::any::type_name::<T>(),
        })
    }

    /// Replace this component's data.
    pub fn set_data<T: ComponentData>(&mut self, data: T) {
        self.prop.states[self.state].set_component_data(self.component.id(), data);
    }

    /// Queue this component for another evaluation in the next step.
    pub fn mark_dirty(&mut self) {
        self.prop.states[self.state].mark_component_dirty(self.component.id());
    }

    /// Check if this state belongs to a subcircuit instance.
    pub fn has_parent(&self) -> bool {
        self.prop.states[self.state].parent.is_some()
    }

    /// Ask the parent's subcircuit component to re-read this state's outputs.
    pub(crate) fn notify_parent(&mut self) {
        if let Some((parent, component)) = self.prop.states[self.state].parent {
            if let Some(node) = self.prop.states.get_mut(parent) {
                node.mark_component_dirty(component);
            }
        }
    }

    /// Child state for this subcircuit component, created or re-attached as
    /// needed.
    pub(crate) fn substate(&mut self, circuit: &Circuit) -> Result<StateId> {
        self.prop.substate(self.state, self.component.id(), circuit)
    }

    pub(crate) fn child_value(&self, child: StateId, loc: Location) -> Value {
        self.prop
            .states
            .get(child)
            .map(|s| s.value(loc))
            .unwrap_or(Value::NIL)
    }

    /// Feed an input pin of a child state; the pin is re-evaluated only if
    /// its value changed.
    pub(crate) fn feed_child_pin(&mut self, child: StateId, pin: ComponentId, value: Value) {
        let Some(node) = self.prop.states.get_mut(child) else {
            return;
        };
        let same = node
            .component_data::<PinState>(pin)
            .is_some_and(|p| p.value == value);
        if !same {
            node.set_component_data(pin, PinState { value });
            node.mark_component_dirty(pin);
        }
    }
}
