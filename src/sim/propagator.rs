//! Settle engine.
//!
//! A [`Propagator`] owns the tree of [`CircuitState`]s below one root
//! circuit and drives it to a fixed point. One *step* evaluates every dirty
//! component of every attached state, then resolves every dirty point
//! through the net resolver. A *settle* repeats steps until nothing is dirty
//! or the oscillation bound is reached.
//!
//! Outputs with a nonzero delay are parked in a table keyed by the tick they
//! arrive at and are only delivered by [`Propagator::tick`], so a feedback
//! loop through a delayed component settles within each tick.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{self, Receiver, Sender};
use slotmap::SlotMap;
use tracing::{debug, trace, warn};

use crate::circuit::{Circuit, CircuitEvent, CircuitId, Component, ComponentId, Location, Structure};
use crate::components::{ClockState, PinState};
use crate::edit::ReplacementMap;
use crate::error::{Result, SimError};
use crate::listeners::ListenerId;
use crate::value::Value;

use super::instance::InstanceState;
use super::simulator::SimulatorConfig;
use super::state::{CircuitState, ComponentSlot, StateId};

/// Outcome of a settle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Nothing is dirty any more
    Settled { steps: usize },
    /// The step bound was reached with work still pending
    Oscillating { steps: usize },
}

impl Propagation {
    pub fn is_oscillating(&self) -> bool {
        matches!(self, Propagation::Oscillating { .. })
    }

    pub fn steps(&self) -> usize {
        match self {
            Propagation::Settled { steps } | Propagation::Oscillating { steps } => *steps,
        }
    }
}

/// A delayed output waiting for its arrival tick.
#[derive(Debug, Clone)]
struct Scheduled {
    state: StateId,
    location: Location,
    cause: ComponentId,
    value: Value,
}

type Waker = Arc<dyn Fn() + Send + Sync>;

/// Forwards circuit change events into a propagator's inbox.
struct EventFeed {
    sender: Sender<CircuitEvent>,
    waker: Mutex<Option<Waker>>,
}

impl EventFeed {
    fn deliver(&self, event: &CircuitEvent) {
        // the receiver only disappears together with the propagator
        let _ = self.sender.send(event.clone());
        let waker = self
            .waker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(wake) = waker {
            wake();
        }
    }
}

/// Settle engine for one root circuit and its subcircuit instances.
pub struct Propagator {
    pub(super) states: SlotMap<StateId, CircuitState>,
    root: StateId,
    clock: u64,
    scheduled: BTreeMap<u64, Vec<Scheduled>>,
    oscillating: bool,
    oscillation_points: BTreeSet<(StateId, Location)>,
    step_points: BTreeSet<(StateId, Location)>,
    bound: usize,
    inbox: Receiver<CircuitEvent>,
    feed: Arc<EventFeed>,
    subscriptions: BTreeMap<CircuitId, (Circuit, ListenerId)>,
}

impl Propagator {
    /// Create a propagator rooted at `circuit`. Every component starts dirty.
    pub fn new(circuit: &Circuit, config: &SimulatorConfig) -> Self {
        let (sender, inbox) = channel::unbounded();
        let mut states = SlotMap::with_key();
        let root = states.insert(CircuitState::new(circuit, None));
        let mut prop = Self {
            states,
            root,
            clock: 0,
            scheduled: BTreeMap::new(),
            oscillating: false,
            oscillation_points: BTreeSet::new(),
            step_points: BTreeSet::new(),
            bound: config.oscillation_bound.max(1),
            inbox,
            feed: Arc::new(EventFeed {
                sender,
                waker: Mutex::new(None),
            }),
            subscriptions: BTreeMap::new(),
        };
        prop.subscribe(circuit);
        prop
    }

    /// Callback run whenever a watched circuit changes.
    pub(crate) fn set_waker(&self, waker: Option<Waker>) {
        *self
            .feed
            .waker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = waker;
    }

    fn subscribe(&mut self, circuit: &Circuit) {
        if self.subscriptions.contains_key(&circuit.id()) {
            return;
        }
        let feed = self.feed.clone();
        let id = circuit.add_listener(move |event| feed.deliver(event));
        self.subscriptions.insert(circuit.id(), (circuit.clone(), id));
    }

    // ============ Queries ============

    pub fn root(&self) -> StateId {
        self.root
    }

    pub fn root_state(&self) -> &CircuitState {
        &self.states[self.root]
    }

    pub fn state(&self, id: StateId) -> Option<&CircuitState> {
        self.states.get(id)
    }

    /// Value at a point of the root circuit.
    pub fn value(&self, loc: Location) -> Value {
        self.root_state().value(loc)
    }

    /// Value at a point of any state.
    pub fn value_in(&self, state: StateId, loc: Location) -> Option<Value> {
        self.states.get(state).map(|s| s.value(loc))
    }

    /// Current tick.
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn is_oscillating(&self) -> bool {
        self.oscillating
    }

    /// Points that kept changing during the last quarter of the last
    /// oscillating settle.
    pub fn oscillation_points(&self) -> Vec<(StateId, Location)> {
        self.oscillation_points.iter().copied().collect()
    }

    /// Points changed by the last step or settle.
    pub fn step_points(&self) -> Vec<(StateId, Location)> {
        self.step_points.iter().copied().collect()
    }

    /// Number of delayed values waiting for a future tick.
    pub fn pending_delayed(&self) -> usize {
        self.scheduled.values().map(Vec::len).sum()
    }

    /// Check if any attached state has pending work.
    pub fn has_dirty(&self) -> bool {
        self.attached_states()
            .into_iter()
            .any(|id| self.states.get(id).is_some_and(CircuitState::is_dirty))
    }

    /// Attached states in pre-order, children by ascending component id.
    pub fn attached_states(&self) -> Vec<StateId> {
        let mut order = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(node) = self.states.get(id) {
                stack.extend(node.children.values().rev().copied());
            }
        }
        order
    }

    // ============ Driving the simulation ============

    /// Record a component's output at a point. Zero delay takes effect
    /// immediately; otherwise the value arrives `delay` ticks from now.
    pub fn set_value(&mut self, state: StateId, loc: Location, value: Value, cause: ComponentId, delay: u32) {
        if delay == 0 {
            if let Some(node) = self.states.get_mut(state) {
                if node.set_cause(loc, cause, value) {
                    node.mark_point_dirty(loc);
                }
            }
        } else {
            self.scheduled
                .entry(self.clock + delay as u64)
                .or_default()
                .push(Scheduled {
                    state,
                    location: loc,
                    cause,
                    value,
                });
        }
    }

    /// Settle until quiescent or until the step bound is reached.
    pub fn propagate(&mut self) -> Result<Propagation> {
        self.sync_structure();
        self.oscillation_points.clear();
        self.step_points.clear();
        let record_from = self.bound - self.bound / 4;
        let mut steps = 0;
        while self.has_dirty() {
            if steps >= self.bound {
                if !self.oscillating {
                    warn!(
                        steps,
                        points = self.oscillation_points.len(),
                        "oscillation detected"
                    );
                }
                self.oscillating = true;
                return Ok(Propagation::Oscillating { steps });
            }
            steps += 1;
            self.sweep(steps > record_from)?;
        }
        debug!(steps, clock = self.clock, "settled");
        Ok(Propagation::Settled { steps })
    }

    /// Run a single step. Returns false if there was nothing to do.
    pub fn step(&mut self) -> Result<bool> {
        self.sync_structure();
        self.step_points.clear();
        if !self.has_dirty() {
            return Ok(false);
        }
        self.sweep(false)?;
        Ok(true)
    }

    /// Advance `count` ticks, settling after each. Stops early when a settle
    /// oscillates.
    pub fn tick(&mut self, count: u32) -> Result<Propagation> {
        let mut outcome = Propagation::Settled { steps: 0 };
        for _ in 0..count {
            self.sync_structure();
            self.advance_clock()?;
            outcome = self.propagate()?;
            if outcome.is_oscillating() {
                break;
            }
        }
        Ok(outcome)
    }

    /// Clear every value, driver and delayed output, restart the clock and
    /// queue every component. Child states survive.
    pub fn reset(&mut self) {
        self.sync_structure();
        self.clock = 0;
        self.scheduled.clear();
        self.oscillating = false;
        self.oscillation_points.clear();
        self.step_points.clear();
        for (_, node) in self.states.iter_mut() {
            node.reset();
        }
        debug!("propagator reset");
    }

    /// Deep copy of the whole state tree, detached from circuit changes.
    pub fn snapshot(&self) -> Propagator {
        let (sender, inbox) = channel::unbounded();
        Self {
            states: self.states.clone(),
            root: self.root,
            clock: self.clock,
            scheduled: self.scheduled.clone(),
            oscillating: self.oscillating,
            oscillation_points: self.oscillation_points.clone(),
            step_points: self.step_points.clone(),
            bound: self.bound,
            inbox,
            feed: Arc::new(EventFeed {
                sender,
                waker: Mutex::new(None),
            }),
            subscriptions: BTreeMap::new(),
        }
    }

    /// Set the value an input pin drives.
    pub fn poke_pin(&mut self, state: StateId, pin: ComponentId, value: Value) -> Result<()> {
        let node = self.node_mut(state)?;
        let comp = find_component(&node.structure, pin)?;
        let width = match comp.kind().as_pin() {
            Some(p) if !p.is_output() => p.width(),
            _ => {
                return Err(SimError::WrongComponentKind {
                    component: pin,
                    expected: "input pin",
                })
            }
        };
        let value = value.extend_width(width, Value::FALSE);
        node.set_component_data(pin, PinState { value });
        node.mark_component_dirty(pin);
        Ok(())
    }

    /// Set the value of the root circuit's pin with the given label.
    pub fn poke_pin_named(&mut self, label: &str, value: Value) -> Result<()> {
        let structure = self.root_state().structure.clone();
        let pin = structure
            .pin_named(label)
            .ok_or_else(|| SimError::invalid_attribute("Pin", "label", format!("no pin labelled {:?}", label)))?;
        self.poke_pin(self.root, pin.id(), value)
    }

    /// Invert a clock's phase, as if clicked.
    pub fn toggle_clock(&mut self, state: StateId, clock: ComponentId) -> Result<()> {
        let ticks = self.clock;
        let node = self.node_mut(state)?;
        let comp = find_component(&node.structure, clock)?;
        let kind = comp.kind().as_clock().cloned().ok_or(SimError::WrongComponentKind {
            component: clock,
            expected: "clock",
        })?;
        let mut data = node.component_data::<ClockState>(clock).cloned().unwrap_or_default();
        data.clicks += 1;
        data.sending = kind.level(ticks, data.clicks);
        node.set_component_data(clock, data);
        node.mark_component_dirty(clock);
        Ok(())
    }

    fn node_mut(&mut self, state: StateId) -> Result<&mut CircuitState> {
        let root_circuit = self.states[self.root].circuit.id();
        self.states
            .get_mut(state)
            .ok_or(SimError::CircuitNotFound { circuit: root_circuit })
    }

    // ============ Pass internals ============

    fn sweep(&mut self, record_oscillation: bool) -> Result<()> {
        let order = self.attached_states();

        for &sid in &order {
            let Some(node) = self.states.get_mut(sid) else {
                continue;
            };
            if node.dirty_components.is_empty() {
                continue;
            }
            let dirty: Vec<ComponentId> = std::mem::take(&mut node.dirty_components).into_iter().collect();
            let structure = node.structure.clone();
            for (i, &id) in dirty.iter().enumerate() {
                let Some(comp) = structure.component(id) else {
                    continue;
                };
                trace!(component = %id, kind = comp.factory(), "propagate");
                let result = {
                    let mut ctx = InstanceState::new(self, sid, comp);
                    comp.kind().propagate(&mut ctx)
                };
                if let Err(err) = result {
                    // the rest stays queued for a later pass
                    if let Some(node) = self.states.get_mut(sid) {
                        node.dirty_components.extend(dirty[i + 1..].iter().copied());
                    }
                    return Err(as_fault(err, comp));
                }
            }
        }

        for &sid in &order {
            let Some(node) = self.states.get_mut(sid) else {
                continue;
            };
            if node.dirty_points.is_empty() {
                continue;
            }
            for loc in node.settle_points() {
                self.step_points.insert((sid, loc));
                if record_oscillation {
                    self.oscillation_points.insert((sid, loc));
                }
            }
        }
        Ok(())
    }

    fn advance_clock(&mut self) -> Result<bool> {
        self.clock += 1;
        let later = self.scheduled.split_off(&(self.clock + 1));
        let due = std::mem::replace(&mut self.scheduled, later);
        for entry in due.into_values().flatten() {
            let Some(node) = self.states.get_mut(entry.state) else {
                continue;
            };
            // the driver may have been removed while its value was in flight
            let alive = node
                .structure
                .component(entry.cause)
                .is_some_and(|c| c.has_end_at(entry.location));
            if alive && node.set_cause(entry.location, entry.cause, entry.value) {
                node.mark_point_dirty(entry.location);
            }
        }

        let ticks = self.clock;
        let mut changed = false;
        for sid in self.attached_states() {
            let structure = self.states[sid].structure.clone();
            for &id in structure.tickers() {
                let Some(comp) = structure.component(id) else {
                    continue;
                };
                let mut ctx = InstanceState::new(self, sid, comp);
                changed |= comp.kind().tick(&mut ctx, ticks).map_err(|e| as_fault(e, comp))?;
            }
        }
        trace!(clock = ticks, changed, "tick");
        Ok(changed)
    }

    /// Child state of a subcircuit component, created or re-attached.
    pub(super) fn substate(&mut self, parent: StateId, component: ComponentId, circuit: &Circuit) -> Result<StateId> {
        let existing = match self.states.get(parent).and_then(|p| p.data.get(&component)) {
            Some(ComponentSlot::Substate(child)) => Some(*child),
            _ => None,
        };
        if let Some(child) = existing {
            let same_circuit = self
                .states
                .get(child)
                .is_some_and(|c| c.circuit.id() == circuit.id());
            if same_circuit {
                if self.states[child].parent != Some((parent, component)) {
                    self.attach_child(parent, component, child);
                }
                return Ok(child);
            }
            self.detach_child(parent, component);
        }

        let child = self.states.insert(CircuitState::new(circuit, Some((parent, component))));
        self.subscribe(circuit);
        let node = self
            .states
            .get_mut(parent)
            .ok_or(SimError::CircuitNotFound { circuit: circuit.id() })?;
        node.data.insert(component, ComponentSlot::Substate(child));
        node.children.insert(component, child);
        debug!(component = %component, circuit = %circuit.id(), "created subcircuit state");
        Ok(child)
    }

    /// Hang `child` under `parent` as the state of `component`.
    pub fn attach_child(&mut self, parent: StateId, component: ComponentId, child: StateId) {
        if !self.states.contains_key(parent) || !self.states.contains_key(child) {
            return;
        }
        if let Some(old) = self.states[parent].children.insert(component, child) {
            if old != child {
                if let Some(node) = self.states.get_mut(old) {
                    node.parent = None;
                }
            }
        }
        self.states[parent]
            .data
            .insert(component, ComponentSlot::Substate(child));
        self.refresh_state(child, &[]);
        let node = &mut self.states[child];
        node.parent = Some((parent, component));
        node.mark_all_dirty();
    }

    /// Unhook the child state of `component`. The parent still remembers it.
    pub fn detach_child(&mut self, parent: StateId, component: ComponentId) -> Option<StateId> {
        let child = self.states.get_mut(parent)?.children.remove(&component)?;
        if let Some(node) = self.states.get_mut(child) {
            node.parent = None;
        }
        Some(child)
    }

    // ============ Structural changes ============

    /// Apply queued circuit change events to every affected state.
    fn sync_structure(&mut self) {
        let mut maps: BTreeMap<CircuitId, Vec<ReplacementMap>> = BTreeMap::new();
        for event in self.inbox.try_iter() {
            maps.entry(event.circuit).or_default().push(event.replacements);
        }
        if maps.is_empty() {
            return;
        }
        self.oscillating = false;
        let affected: Vec<(StateId, CircuitId)> = self
            .states
            .iter()
            .filter(|(_, s)| maps.contains_key(&s.circuit.id()))
            .map(|(id, s)| (id, s.circuit.id()))
            .collect();
        for (sid, circuit) in affected {
            let empty = Vec::new();
            let circuit_maps = maps.get(&circuit).unwrap_or(&empty);
            self.refresh_state(sid, circuit_maps);
        }
    }

    /// Bring one state up to its circuit's latest structure.
    fn refresh_state(&mut self, sid: StateId, maps: &[ReplacementMap]) {
        let Some(node) = self.states.get_mut(sid) else {
            return;
        };
        let new = node.circuit.snapshot();
        let old = node.structure.clone();

        let mut detach = Vec::new();
        for map in maps {
            migrate(node, &old, &new, map, &mut detach);
        }

        if new.generation() != old.generation() {
            node.structure = new.clone();
            node.threads.invalidate();
            diff(node, &old, &new, &mut detach);
            debug!(
                circuit = %new.circuit(),
                generation = new.generation(),
                "state follows structure change"
            );
        }

        for (component, child) in detach {
            let still_ours = self
                .states
                .get(sid)
                .and_then(|n| n.children.get(&component))
                .is_some_and(|c| *c == child);
            if still_ours {
                self.detach_child(sid, component);
            } else if let Some(node) = self.states.get_mut(child) {
                if node.parent == Some((sid, component)) {
                    node.parent = None;
                }
            }
        }
    }
}

impl Drop for Propagator {
    fn drop(&mut self) {
        for (circuit, id) in self.subscriptions.values() {
            circuit.remove_listener(*id);
        }
    }
}

/// Move per-component data along a replacement map. Data follows a
/// replacement with the same factory key; otherwise it is dropped.
fn migrate(
    node: &mut CircuitState,
    old: &Structure,
    new: &Structure,
    map: &ReplacementMap,
    detach: &mut Vec<(ComponentId, StateId)>,
) {
    for (old_id, targets) in map.replacements() {
        // plain removals keep their data so an undo can pick it up again
        if targets.is_empty() {
            continue;
        }
        let Some(slot) = node.data.remove(old_id) else {
            continue;
        };
        let key = old
            .component(*old_id)
            .or_else(|| new.component(*old_id))
            .map(|c| c.kind().factory_key());
        let target = key.and_then(|key| {
            targets
                .iter()
                .copied()
                .find(|t| new.component(*t).is_some_and(|c| c.kind().factory_key() == key))
        });
        match (target, slot) {
            (Some(target), ComponentSlot::Substate(child)) => {
                node.children.remove(old_id);
                if let Some(ComponentSlot::Substate(previous)) = node.data.get(&target) {
                    if *previous != child {
                        detach.push((target, *previous));
                    }
                }
                node.children.insert(target, child);
                node.data.insert(target, ComponentSlot::Substate(child));
                node.mark_component_dirty(target);
            }
            (Some(target), slot) => {
                node.data.insert(target, slot);
                node.mark_component_dirty(target);
            }
            (None, ComponentSlot::Substate(child)) => {
                node.children.remove(old_id);
                detach.push((*old_id, child));
            }
            (None, _) => {}
        }
    }
}

/// Dirty everything an edit between two structures touched and drop the
/// drivers of ends that disappeared.
fn diff(node: &mut CircuitState, old: &Structure, new: &Structure, detach: &mut Vec<(ComponentId, StateId)>) {
    for oc in old.components() {
        match new.component(oc.id()) {
            None => {
                for end in oc.ends() {
                    node.remove_cause(end.location, oc.id());
                    node.mark_point_dirty(end.location);
                }
                node.dirty_components.remove(&oc.id());
                if let Some(child) = node.children.get(&oc.id()).copied() {
                    detach.push((oc.id(), child));
                }
            }
            Some(nc) if !oc.same_shape(nc) => {
                for end in oc.ends() {
                    if !nc.has_end_at(end.location) {
                        node.remove_cause(end.location, oc.id());
                    }
                    node.mark_point_dirty(end.location);
                }
                for end in nc.ends() {
                    node.mark_point_dirty(end.location);
                }
                if oc.kind().factory_key() != nc.kind().factory_key() {
                    if let Some(ComponentSlot::Substate(child)) = node.data.remove(&oc.id()) {
                        detach.push((oc.id(), child));
                    }
                }
                node.mark_component_dirty(nc.id());
            }
            Some(_) => {}
        }
    }
    for nc in new.components() {
        if old.component(nc.id()).is_none() {
            node.mark_component_dirty(nc.id());
            for end in nc.ends() {
                node.mark_point_dirty(end.location);
            }
        }
    }
    for wire in old.wires().symmetric_difference(new.wires()) {
        for loc in wire.ends() {
            node.mark_point_dirty(loc);
        }
    }
}

fn find_component(structure: &Structure, id: ComponentId) -> Result<&Component> {
    structure.component(id).ok_or(SimError::ComponentNotFound {
        circuit: structure.circuit(),
        component: id,
    })
}

fn as_fault(err: SimError, comp: &Component) -> SimError {
    match err {
        SimError::ComponentFault { .. } => err,
        other => SimError::fault(comp.id(), comp.factory(), other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{AttributeSet, EndData};
    use crate::components::CustomComponent;
    use crate::demos;
    use crate::edit::Transaction;
    use crate::project::Project;
    use crate::sim::InstanceState;

    fn project() -> Project {
        Project::new(SimulatorConfig::default().with_oscillation_bound(64)).unwrap()
    }

    fn pin(label: &str, output: bool) -> AttributeSet {
        AttributeSet::new().with("label", label).with("output", output)
    }

    /// `y = NOT a`, returning the circuit and the gate's id.
    fn inverter(project: &Project) -> (Circuit, ComponentId) {
        let circuit = project.add_circuit("inverter");
        let mut b = project.builder(&circuit);
        b.component("Pin", (0, 0), pin("a", false)).unwrap();
        let not = b.component("NOT Gate", (60, 0), AttributeSet::new()).unwrap();
        b.component("Pin", (60, 0), pin("y", true)).unwrap();
        b.wire((0, 0), (30, 0)).unwrap();
        b.commit().unwrap();
        (circuit, not)
    }

    fn probe(prop: &Propagator, label: &str) -> Value {
        let structure = prop.root_state().structure().clone();
        let pin = structure.pin_named(label).unwrap();
        prop.value(pin.location())
    }

    #[test]
    fn test_inverter_follows_input() {
        let project = project();
        let (circuit, _) = inverter(&project);
        let mut prop = project.new_propagator(&circuit);
        assert!(!prop.propagate().unwrap().is_oscillating());
        assert_eq!(probe(&prop, "y"), Value::TRUE);

        prop.poke_pin_named("a", Value::TRUE).unwrap();
        prop.propagate().unwrap();
        assert_eq!(probe(&prop, "y"), Value::FALSE);
        assert!(prop.step_points().iter().any(|(_, loc)| *loc == Location::new(60, 0)));
    }

    #[test]
    fn test_settle_is_idempotent() {
        let project = project();
        let circuit = demos::adder(&project, 2).unwrap();
        let mut prop = project.new_propagator(&circuit);
        assert!(prop.propagate().unwrap().steps() > 0);
        assert_eq!(prop.propagate().unwrap(), Propagation::Settled { steps: 0 });
        assert!(!prop.has_dirty());
    }

    #[test]
    fn test_poke_rejects_non_pins() {
        let project = project();
        let (circuit, not) = inverter(&project);
        let mut prop = project.new_propagator(&circuit);
        let root = prop.root();
        assert!(matches!(
            prop.poke_pin(root, not, Value::TRUE),
            Err(SimError::WrongComponentKind { .. })
        ));
        assert!(prop.poke_pin_named("y", Value::TRUE).is_err());
        assert!(prop.poke_pin_named("nope", Value::TRUE).is_err());
    }

    #[test]
    fn test_zero_delay_ring_oscillates() {
        let project = project();
        let circuit = demos::ring(&project, 3, 0).unwrap();
        let mut prop = project.new_propagator(&circuit);
        assert_eq!(prop.propagate().unwrap(), Propagation::Oscillating { steps: 64 });
        assert!(prop.is_oscillating());
        assert!(!prop.oscillation_points().is_empty());

        prop.poke_pin_named("stop", Value::TRUE).unwrap();
        assert!(!prop.propagate().unwrap().is_oscillating());
        assert_eq!(probe(&prop, "out"), Value::FALSE);
        // a quiet settle does not clear the flag
        assert!(prop.is_oscillating());
        prop.tick(1).unwrap();
        assert!(prop.is_oscillating());

        prop.reset();
        assert!(!prop.is_oscillating());
    }

    #[test]
    fn test_edit_clears_oscillation() {
        let project = project();
        let circuit = demos::ring(&project, 3, 0).unwrap();
        let mut prop = project.new_propagator(&circuit);
        assert!(prop.propagate().unwrap().is_oscillating());

        // open the loop
        let feedback = crate::circuit::Wire::new((180, 0), (30, 10)).unwrap();
        project
            .submit(&Transaction::new().remove_wire(&circuit, feedback))
            .unwrap();
        assert!(!prop.propagate().unwrap().is_oscillating());
        assert!(!prop.is_oscillating());
        assert_eq!(probe(&prop, "out"), Value::TRUE);
    }

    #[test]
    fn test_delayed_ring_toggles_every_tick() {
        let project = project();
        let circuit = demos::ring(&project, 3, 1).unwrap();
        let mut prop = project.new_propagator(&circuit);
        assert!(!prop.propagate().unwrap().is_oscillating());
        // the delayed gate ran before and after its `stop` input resolved
        assert!(prop.pending_delayed() >= 1);

        let mut seen = Vec::new();
        for _ in 0..4 {
            assert!(!prop.tick(1).unwrap().is_oscillating());
            seen.push(probe(&prop, "out"));
        }
        assert_eq!(seen, vec![Value::TRUE, Value::FALSE, Value::TRUE, Value::FALSE]);
        assert_eq!(prop.clock(), 4);
    }

    #[test]
    fn test_same_inputs_same_values() {
        let project = project();
        let circuit = demos::counter(&project, 3).unwrap();
        let mut first = project.new_propagator(&circuit);
        let mut second = project.new_propagator(&circuit);
        first.tick(7).unwrap();
        second.tick(7).unwrap();
        for loc in circuit.snapshot().points().locations() {
            assert_eq!(first.value(loc), second.value(loc), "at {}", loc);
        }
    }

    #[test]
    fn test_reset_restarts_clock() {
        let project = project();
        let circuit = demos::counter(&project, 3).unwrap();
        let mut prop = project.new_propagator(&circuit);
        prop.propagate().unwrap();
        prop.tick(5).unwrap();
        assert_eq!(probe(&prop, "count").to_u64(), Some(3));

        prop.reset();
        assert_eq!(prop.clock(), 0);
        prop.propagate().unwrap();
        assert_eq!(probe(&prop, "count").to_u64(), Some(0));
    }

    #[test]
    fn test_snapshot_is_independent() {
        let project = project();
        let (circuit, _) = inverter(&project);
        let mut prop = project.new_propagator(&circuit);
        prop.propagate().unwrap();
        let copy = prop.snapshot();

        prop.poke_pin_named("a", Value::TRUE).unwrap();
        prop.propagate().unwrap();
        assert_eq!(probe(&prop, "y"), Value::FALSE);
        assert_eq!(probe(&copy, "y"), Value::TRUE);
    }

    #[test]
    fn test_follows_live_edits() {
        let project = project();
        let (circuit, not) = inverter(&project);
        let mut prop = project.new_propagator(&circuit);
        prop.propagate().unwrap();
        assert_eq!(probe(&prop, "y"), Value::TRUE);

        let buffer = project
            .create_component("Buffer", (60, 0), AttributeSet::new())
            .unwrap();
        project
            .submit(&Transaction::new().replace(&circuit, vec![not], vec![buffer]))
            .unwrap();
        prop.propagate().unwrap();
        assert_eq!(probe(&prop, "y"), Value::FALSE);

        let wire = crate::circuit::Wire::new((0, 0), (30, 0)).unwrap();
        project
            .submit(&Transaction::new().remove_wire(&circuit, wire))
            .unwrap();
        prop.propagate().unwrap();
        // the buffer's only input floats
        assert!(probe(&prop, "y").is_unknown());
    }

    #[test]
    fn test_undo_reattaches_child_state() {
        let project = project();
        let (cell, _) = inverter(&project);
        let top = project.add_circuit("top");
        let mut b = project.builder(&top);
        let instance = b.subcircuit(&cell, (100, 0));
        b.commit().unwrap();

        let mut prop = project.new_propagator(&top);
        prop.propagate().unwrap();
        let child = prop.root_state().child(instance).unwrap();
        assert_eq!(prop.state(child).unwrap().parent(), Some((prop.root(), instance)));
        assert_eq!(prop.attached_states(), vec![prop.root(), child]);

        let removal = project
            .submit(&Transaction::new().remove(&top, instance))
            .unwrap();
        prop.propagate().unwrap();
        assert_eq!(prop.root_state().child(instance), None);
        assert_eq!(prop.state(child).unwrap().parent(), None);
        assert_eq!(prop.attached_states(), vec![prop.root()]);

        project.submit(removal.reverse()).unwrap();
        prop.propagate().unwrap();
        assert_eq!(prop.root_state().child(instance), Some(child));
    }

    #[test]
    fn test_child_values_reach_parent() {
        let project = project();
        let (cell, _) = inverter(&project);
        let top = project.add_circuit("top");
        let mut b = project.builder(&top);
        // ports: a at (0,0), y at (60,0)
        b.component("Pin", (0, 0), pin("in", false)).unwrap();
        b.subcircuit(&cell, (100, 0));
        b.component("Pin", (160, 0), pin("out", true)).unwrap();
        b.wire((0, 0), (100, 0)).unwrap();
        b.commit().unwrap();

        let mut prop = project.new_propagator(&top);
        prop.propagate().unwrap();
        assert_eq!(probe(&prop, "out"), Value::TRUE);
        prop.poke_pin_named("in", Value::TRUE).unwrap();
        prop.propagate().unwrap();
        assert_eq!(probe(&prop, "out"), Value::FALSE);
    }

    #[derive(Debug)]
    struct Faulty;

    impl CustomComponent for Faulty {
        fn ends(&self, location: Location) -> Vec<EndData> {
            vec![EndData::output(location, crate::value::BitWidth::ONE)]
        }

        fn propagate(&self, state: &mut InstanceState<'_>) -> Result<()> {
            // port 1 does not exist
            state.set_port(1, Value::TRUE, 0)
        }
    }

    #[test]
    fn test_component_error_is_a_fault() {
        let project = project();
        project.register_custom("Faulty", Arc::new(Faulty));
        let circuit = project.add_circuit("broken");
        let mut b = project.builder(&circuit);
        let id = b.component("Faulty", (0, 0), AttributeSet::new()).unwrap();
        b.commit().unwrap();

        let mut prop = project.new_propagator(&circuit);
        match prop.propagate() {
            Err(SimError::ComponentFault { component, kind, .. }) => {
                assert_eq!(component, id);
                assert_eq!(kind, "Faulty");
            }
            other => panic!("expected a fault, got {:?}", other),
        }
    }
}
