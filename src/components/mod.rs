//! Component models for logic simulation.
//!
//! This module provides the built-in component kinds:
//! - Gates: AND, OR, NAND, NOR, XOR, XNOR, NOT, Buffer
//! - Wiring: Pin, Constant, Clock, Splitter
//! - Memory: D flip-flop
//! - Hierarchy: Subcircuit instances
//!
//! Kinds are created by name through a [`FactoryTable`]. Behaviour outside the
//! built-in set plugs in through the [`CustomComponent`] trait.

mod gates;
mod memory;
mod splitter;
mod subcircuit;
mod wiring;

pub use gates::{Gate, GateOp};
pub use memory::{DFlipFlop, FlipFlopState, Trigger};
pub use splitter::Splitter;
pub use subcircuit::Subcircuit;
pub use wiring::{Clock, ClockState, Constant, Pin, PinState};

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::circuit::{AttributeSet, EndData, Location};
use crate::error::{Result, SimError};
use crate::sim::InstanceState;

/// Per-state data a component keeps between passes (flip-flop contents,
/// clock phase, pin value).
///
/// Implemented for every `Clone + Debug + Send` type, so component authors
/// only need to derive those.
pub trait ComponentData: Any + Send + fmt::Debug {
    /// Deep copy for state snapshots.
    fn clone_data(&self) -> Box<dyn ComponentData>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Send + Clone + fmt::Debug> ComponentData for T {
    fn clone_data(&self) -> Box<dyn ComponentData> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Clone for Box<dyn ComponentData> {
    fn clone(&self) -> Self {
        // deref twice so the blanket impl on Box itself is not picked
        (**self).clone_data()
    }
}

/// Behaviour for component kinds defined outside this crate.
pub trait CustomComponent: Send + Sync + fmt::Debug {
    /// Connection points for an instance anchored at `location`.
    fn ends(&self, location: Location) -> Vec<EndData>;

    /// Read input ports and drive output ports.
    fn propagate(&self, state: &mut InstanceState<'_>) -> Result<()>;

    /// Whether [`CustomComponent::tick`] should be called on clock ticks.
    fn wants_ticks(&self) -> bool {
        false
    }

    /// Clock-tick hook. Returns true if the component changed.
    fn tick(&self, _state: &mut InstanceState<'_>, _ticks: u64) -> Result<bool> {
        Ok(false)
    }
}

/// A component kind registered from outside the crate.
#[derive(Debug, Clone)]
pub struct CustomKind {
    name: String,
    behavior: Arc<dyn CustomComponent>,
}

impl CustomKind {
    pub fn new(name: impl Into<String>, behavior: Arc<dyn CustomComponent>) -> Self {
        Self {
            name: name.into(),
            behavior,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn behavior(&self) -> &Arc<dyn CustomComponent> {
        &self.behavior
    }
}

/// The behaviour of a component instance.
#[derive(Debug, Clone)]
pub enum ComponentKind {
    Gate(Gate),
    Pin(Pin),
    Constant(Constant),
    Clock(Clock),
    FlipFlop(DFlipFlop),
    Splitter(Splitter),
    Subcircuit(Subcircuit),
    Custom(CustomKind),
}

impl ComponentKind {
    /// Identity used to decide whether state may migrate between two
    /// components during a replacement.
    pub fn factory_key(&self) -> String {
        match self {
            ComponentKind::Gate(g) => g.op().factory_name().to_string(),
            ComponentKind::Pin(_) => wiring::PIN.to_string(),
            ComponentKind::Constant(_) => wiring::CONSTANT.to_string(),
            ComponentKind::Clock(_) => wiring::CLOCK.to_string(),
            ComponentKind::FlipFlop(_) => memory::D_FLIP_FLOP.to_string(),
            ComponentKind::Splitter(_) => splitter::SPLITTER.to_string(),
            ComponentKind::Subcircuit(s) => format!("Subcircuit({})", s.circuit().id()),
            ComponentKind::Custom(c) => c.name().to_string(),
        }
    }

    /// Connection points for an instance anchored at `location`.
    pub fn ends(&self, location: Location) -> Vec<EndData> {
        match self {
            ComponentKind::Gate(g) => g.ends(location),
            ComponentKind::Pin(p) => p.ends(location),
            ComponentKind::Constant(c) => c.ends(location),
            ComponentKind::Clock(c) => c.ends(location),
            ComponentKind::FlipFlop(f) => f.ends(location),
            ComponentKind::Splitter(s) => s.ends(location),
            ComponentKind::Subcircuit(s) => s.ends(location),
            ComponentKind::Custom(c) => c.behavior.ends(location),
        }
    }

    /// Recompute outputs from inputs and internal data.
    ///
    /// Splitters have no behaviour of their own; the net resolver threads
    /// their bits.
    pub fn propagate(&self, state: &mut InstanceState<'_>) -> Result<()> {
        match self {
            ComponentKind::Gate(g) => g.propagate(state),
            ComponentKind::Pin(p) => p.propagate(state),
            ComponentKind::Constant(c) => c.propagate(state),
            ComponentKind::Clock(c) => c.propagate(state),
            ComponentKind::FlipFlop(f) => f.propagate(state),
            ComponentKind::Splitter(_) => Ok(()),
            ComponentKind::Subcircuit(s) => s.propagate(state),
            ComponentKind::Custom(c) => c.behavior.propagate(state),
        }
    }

    /// Check if the kind has a clock-tick hook.
    pub fn wants_ticks(&self) -> bool {
        match self {
            ComponentKind::Clock(_) => true,
            ComponentKind::Custom(c) => c.behavior.wants_ticks(),
            _ => false,
        }
    }

    /// Clock-tick hook. Returns true if the component changed.
    pub fn tick(&self, state: &mut InstanceState<'_>, ticks: u64) -> Result<bool> {
        match self {
            ComponentKind::Clock(c) => c.tick(state, ticks),
            ComponentKind::Custom(c) => c.behavior.tick(state, ticks),
            _ => Ok(false),
        }
    }

    pub fn as_pin(&self) -> Option<&Pin> {
        match self {
            ComponentKind::Pin(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_splitter(&self) -> Option<&Splitter> {
        match self {
            ComponentKind::Splitter(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_subcircuit(&self) -> Option<&Subcircuit> {
        match self {
            ComponentKind::Subcircuit(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_clock(&self) -> Option<&Clock> {
        match self {
            ComponentKind::Clock(c) => Some(c),
            _ => None,
        }
    }
}

/// Settings a factory may consult when building a kind.
#[derive(Debug, Clone, Copy)]
pub struct FactoryContext {
    /// Widest bus a component may declare
    pub max_width: u32,
}

/// Builds a component kind from attributes.
pub type FactoryFn = Arc<dyn Fn(&AttributeSet, &FactoryContext) -> Result<ComponentKind> + Send + Sync>;

/// Name-keyed registry of component factories.
#[derive(Clone)]
pub struct FactoryTable {
    context: FactoryContext,
    factories: BTreeMap<String, FactoryFn>,
}

impl FactoryTable {
    /// Create an empty table.
    pub fn new(max_width: u32) -> Self {
        Self {
            context: FactoryContext { max_width },
            factories: BTreeMap::new(),
        }
    }

    /// Create a table holding every built-in kind.
    pub fn with_builtins(max_width: u32) -> Self {
        let mut table = Self::new(max_width);
        gates::register(&mut table);
        wiring::register(&mut table);
        memory::register(&mut table);
        splitter::register(&mut table);
        table
    }

    /// Register (or replace) a factory.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&AttributeSet, &FactoryContext) -> Result<ComponentKind> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    /// Check if a factory is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered factory names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Width ceiling enforced by built-in factories.
    pub fn max_width(&self) -> u32 {
        self.context.max_width
    }

    /// Build a kind by factory name.
    pub fn build(&self, name: &str, attrs: &AttributeSet) -> Result<ComponentKind> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| SimError::UnknownFactory {
                name: name.to_string(),
            })?;
        factory(attrs, &self.context)
    }
}

impl fmt::Debug for FactoryTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryTable")
            .field("max_width", &self.context.max_width)
            .field("factories", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        let table = FactoryTable::with_builtins(32);
        for name in ["AND Gate", "NOT Gate", "Pin", "Clock", "Constant", "Splitter", "D Flip-Flop"] {
            assert!(table.contains(name), "missing {}", name);
        }
        assert!(matches!(
            table.build("Flux Capacitor", &AttributeSet::new()),
            Err(SimError::UnknownFactory { .. })
        ));
    }

    #[test]
    fn test_width_ceiling_enforced() {
        let table = FactoryTable::with_builtins(8);
        let attrs = AttributeSet::new().with("width", 16);
        assert!(matches!(
            table.build("Pin", &attrs),
            Err(SimError::InvalidAttribute { .. })
        ));
        let attrs = AttributeSet::new().with("width", 8);
        assert!(table.build("Pin", &attrs).is_ok());
    }

    #[test]
    fn test_factory_keys() {
        let table = FactoryTable::with_builtins(32);
        let and = table.build("AND Gate", &AttributeSet::new()).unwrap();
        let and3 = table
            .build("AND Gate", &AttributeSet::new().with("inputs", 3))
            .unwrap();
        let or = table.build("OR Gate", &AttributeSet::new()).unwrap();
        assert_eq!(and.factory_key(), and3.factory_key());
        assert_ne!(and.factory_key(), or.factory_key());
    }

    #[test]
    fn test_component_data_clone() {
        #[derive(Debug, Clone, PartialEq)]
        struct Counter(u32);

        let data: Box<dyn ComponentData> = Box::new(Counter(3));
        let copy = data.clone();
        assert_eq!((*copy).as_any().downcast_ref::<Counter>(), Some(&Counter(3)));
    }
}
