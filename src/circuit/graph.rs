//! Circuit templates.
//!
//! A [`Circuit`] is a shared handle to a named template: its components,
//! wires and attributes behind a read/write lock, plus listeners for
//! structural changes. Every committed edit produces an immutable
//! [`Structure`] snapshot (point index, nets, ports) that the simulator works
//! from without holding the lock.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

use super::attrs::AttributeSet;
use super::component::Component;
use super::nets::NetMap;
use super::points::PointIndex;
use super::types::{CircuitId, ComponentId, Location, WidthIncompatibility, Wire};
use crate::edit::ReplacementMap;
use crate::listeners::{ListenerId, Listeners};
use crate::value::BitWidth;

/// One interface port of a circuit, backed by a pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// The pin component inside the circuit
    pub pin: ComponentId,
    /// Pin location; instance ports sit at this offset from their anchor
    pub location: Location,
    pub width: BitWidth,
    /// True for output pins (the instance drives the port)
    pub output: bool,
    pub label: String,
}

/// Ports of a component set, ordered by pin location.
pub(crate) fn compute_ports<'a>(components: impl IntoIterator<Item = &'a Component>) -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = components
        .into_iter()
        .filter_map(|c| {
            c.kind().as_pin().map(|pin| PortInfo {
                pin: c.id(),
                location: c.location(),
                width: pin.width(),
                output: pin.is_output(),
                label: pin.label().to_string(),
            })
        })
        .collect();
    ports.sort_by_key(|p| (p.location.y, p.location.x, p.pin));
    ports
}

/// Immutable snapshot of a circuit as of one committed edit.
#[derive(Debug)]
pub struct Structure {
    circuit: CircuitId,
    name: String,
    generation: u64,
    attrs: AttributeSet,
    components: BTreeMap<ComponentId, Component>,
    wires: BTreeSet<Wire>,
    points: PointIndex,
    nets: NetMap,
    ports: Vec<PortInfo>,
    tickers: Vec<ComponentId>,
}

impl Structure {
    pub(crate) fn build(
        circuit: CircuitId,
        name: String,
        attrs: AttributeSet,
        components: BTreeMap<ComponentId, Component>,
        wires: BTreeSet<Wire>,
        generation: u64,
    ) -> Self {
        let points = PointIndex::build(components.values(), wires.iter());
        let nets = NetMap::compute(&components, &wires, &points, generation);
        let ports = compute_ports(components.values());
        let tickers = components
            .values()
            .filter(|c| c.kind().wants_ticks())
            .map(Component::id)
            .collect();
        Self {
            circuit,
            name,
            generation,
            attrs,
            components,
            wires,
            points,
            nets,
            ports,
            tickers,
        }
    }

    pub fn circuit(&self) -> CircuitId {
        self.circuit
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Commit counter of the circuit when this snapshot was taken.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn attrs(&self) -> &AttributeSet {
        &self.attrs
    }

    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(&id)
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn wires(&self) -> &BTreeSet<Wire> {
        &self.wires
    }

    pub fn points(&self) -> &PointIndex {
        &self.points
    }

    pub fn nets(&self) -> &NetMap {
        &self.nets
    }

    /// Interface ports, ordered by pin location.
    pub fn ports(&self) -> &[PortInfo] {
        &self.ports
    }

    /// Components with a clock-tick hook.
    pub fn tickers(&self) -> &[ComponentId] {
        &self.tickers
    }

    /// Width a point carries: its net's width if wired, else the component
    /// width declared there.
    pub fn width_at(&self, loc: Location) -> BitWidth {
        match self.nets.net_at(loc) {
            Some(net) if !net.width().is_unknown() => net.width(),
            _ => self.points.width_at(loc),
        }
    }

    /// Every width conflict, at single points and across nets.
    pub fn width_incompatibilities(&self) -> Vec<WidthIncompatibility> {
        self.points
            .incompatibilities()
            .iter()
            .cloned()
            .chain(self.nets.incompatibilities().cloned())
            .collect()
    }

    /// First pin with the given label.
    pub fn pin_named(&self, label: &str) -> Option<&Component> {
        self.components
            .values()
            .find(|c| c.kind().as_pin().is_some_and(|p| p.label() == label))
    }
}

/// Notification fired for a circuit after a transaction modified it.
#[derive(Debug, Clone)]
pub struct CircuitEvent {
    pub circuit: CircuitId,
    /// Generation of the structure the transaction committed
    pub generation: u64,
    /// Which components replaced which
    pub replacements: ReplacementMap,
}

/// Mutable contents of a circuit, reachable only through its lock.
#[derive(Debug)]
pub(crate) struct CircuitBody {
    pub(crate) name: String,
    pub(crate) attrs: AttributeSet,
    pub(crate) components: BTreeMap<ComponentId, Component>,
    pub(crate) wires: BTreeSet<Wire>,
    generation: u64,
    structure: Arc<Structure>,
}

impl CircuitBody {
    fn new(id: CircuitId, name: String) -> Self {
        let structure = Arc::new(Structure::build(
            id,
            name.clone(),
            AttributeSet::new(),
            BTreeMap::new(),
            BTreeSet::new(),
            0,
        ));
        Self {
            name,
            attrs: AttributeSet::new(),
            components: BTreeMap::new(),
            wires: BTreeSet::new(),
            generation: 0,
            structure,
        }
    }

    /// Rebuild the structure snapshot from the current contents.
    pub(crate) fn commit(&mut self, id: CircuitId) -> Arc<Structure> {
        self.generation += 1;
        self.structure = Arc::new(Structure::build(
            id,
            self.name.clone(),
            self.attrs.clone(),
            self.components.clone(),
            self.wires.clone(),
            self.generation,
        ));
        let conflicts = self.structure.width_incompatibilities().len();
        if conflicts > 0 {
            warn!(circuit = %id, conflicts, "circuit has incompatible widths");
        }
        self.structure.clone()
    }

    /// Structure as of the last commit.
    pub(crate) fn committed(&self) -> &Arc<Structure> {
        &self.structure
    }

    pub(crate) fn ports(&self) -> Vec<PortInfo> {
        compute_ports(self.components.values())
    }
}

struct CircuitShared {
    id: CircuitId,
    body: RwLock<CircuitBody>,
    listeners: Listeners<CircuitEvent>,
}

/// Shared handle to a circuit template.
#[derive(Clone)]
pub struct Circuit {
    shared: Arc<CircuitShared>,
}

impl Circuit {
    pub(crate) fn new(id: CircuitId, name: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(CircuitShared {
                id,
                body: RwLock::new(CircuitBody::new(id, name.into())),
                listeners: Listeners::new(),
            }),
        }
    }

    pub fn id(&self) -> CircuitId {
        self.shared.id
    }

    pub fn name(&self) -> String {
        self.read_body().name.clone()
    }

    /// The latest committed structure.
    ///
    /// Takes the read lock only for the duration of the call.
    pub fn snapshot(&self) -> Arc<Structure> {
        self.read_body().structure.clone()
    }

    /// Register a callback for committed changes to this circuit.
    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&CircuitEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.add(callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    pub(crate) fn fire(&self, event: &CircuitEvent) {
        self.shared.listeners.fire(event);
    }

    pub(crate) fn read_body(&self) -> RwLockReadGuard<'_, CircuitBody> {
        self.shared.body.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn write_body(&self) -> RwLockWriteGuard<'_, CircuitBody> {
        self.shared.body.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PartialEq for Circuit {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Circuit {}

impl fmt::Debug for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Circuit").field(&self.id()).finish()
    }
}
