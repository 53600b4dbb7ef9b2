//! Circuit registry and transaction entry point.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, warn};

use crate::circuit::{
    validate_structure, AttributeSet, Circuit, CircuitId, Component, ComponentId, Issue, Location, Structure, Wire,
};
use crate::components::{ComponentKind, CustomComponent, CustomKind, FactoryContext, FactoryTable, Subcircuit};
use crate::edit::locker::{self, LockSet};
use crate::edit::{Access, CircuitChange, Mutator, Transaction, TransactionResult};
use crate::error::{Result, SimError};
use crate::sim::{Propagator, SimulatorConfig};

/// Factory name recorded on subcircuit instances.
pub const SUBCIRCUIT: &str = "Subcircuit";

/// User circuit -> templates it instantiates, with instance counts.
type UseIndex = BTreeMap<CircuitId, BTreeMap<CircuitId, usize>>;

/// Owns circuits, the factory table and the index of which circuits embed
/// which. All structural edits go through [`Project::submit`].
pub struct Project {
    config: SimulatorConfig,
    next_component: AtomicU64,
    next_circuit: AtomicU64,
    circuits: RwLock<BTreeMap<CircuitId, Circuit>>,
    uses: Mutex<UseIndex>,
    /// Held from the recursion check until the new uses are recorded.
    placing: Mutex<()>,
    factories: RwLock<FactoryTable>,
}

impl Project {
    /// Create a project with the built-in component kinds.
    pub fn new(config: SimulatorConfig) -> Result<Self> {
        config.validate()?;
        let factories = FactoryTable::with_builtins(config.max_bus_width as u32);
        Ok(Self {
            config,
            next_component: AtomicU64::new(1),
            next_circuit: AtomicU64::new(1),
            circuits: RwLock::new(BTreeMap::new()),
            uses: Mutex::new(BTreeMap::new()),
            placing: Mutex::new(()),
            factories: RwLock::new(factories),
        })
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    fn read_circuits(&self) -> RwLockReadGuard<'_, BTreeMap<CircuitId, Circuit>> {
        self.circuits.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_circuits(&self) -> RwLockWriteGuard<'_, BTreeMap<CircuitId, Circuit>> {
        self.circuits.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_uses(&self) -> MutexGuard<'_, UseIndex> {
        self.uses.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_placing(&self) -> MutexGuard<'_, ()> {
        self.placing.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_factories(&self) -> RwLockReadGuard<'_, FactoryTable> {
        self.factories.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ============ Circuits ============

    /// Create an empty circuit.
    pub fn add_circuit(&self, name: &str) -> Circuit {
        let id = CircuitId(self.next_circuit.fetch_add(1, Ordering::Relaxed));
        let circuit = Circuit::new(id, name);
        self.write_circuits().insert(id, circuit.clone());
        debug!(circuit = %id, name, "circuit added");
        circuit
    }

    pub fn circuit(&self, id: CircuitId) -> Option<Circuit> {
        self.read_circuits().get(&id).cloned()
    }

    pub fn circuit_named(&self, name: &str) -> Option<Circuit> {
        self.read_circuits().values().find(|c| c.name() == name).cloned()
    }

    /// Every circuit in id order.
    pub fn circuits(&self) -> Vec<Circuit> {
        self.read_circuits().values().cloned().collect()
    }

    /// Drop a circuit nothing else instantiates.
    pub fn remove_circuit(&self, circuit: &Circuit) -> Result<()> {
        let users = self.embedder_ids(circuit.id()).len();
        if users > 0 {
            return Err(SimError::CircuitInUse {
                circuit: circuit.name(),
                users,
            });
        }
        self.write_circuits()
            .remove(&circuit.id())
            .ok_or(SimError::CircuitNotFound { circuit: circuit.id() })?;
        self.lock_uses().remove(&circuit.id());
        debug!(circuit = %circuit.id(), "circuit removed");
        Ok(())
    }

    fn embedder_ids(&self, template: CircuitId) -> BTreeSet<CircuitId> {
        embedders_in(&self.lock_uses(), template)
    }

    /// Circuits that hold at least one instance of `circuit`.
    pub fn embedders(&self, circuit: &Circuit) -> Vec<Circuit> {
        let ids = self.embedder_ids(circuit.id());
        let circuits = self.read_circuits();
        ids.iter().filter_map(|id| circuits.get(id).cloned()).collect()
    }

    // ============ Components ============

    /// Register (or replace) a component factory.
    pub fn register_factory<F>(&self, name: &str, factory: F)
    where
        F: Fn(&AttributeSet, &FactoryContext) -> Result<ComponentKind> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .register(name, factory);
    }

    /// Register a kind whose behaviour does not depend on attributes.
    pub fn register_custom(&self, name: &str, behavior: Arc<dyn CustomComponent>) {
        let kind_name = name.to_string();
        self.register_factory(name, move |_, _| {
            Ok(ComponentKind::Custom(CustomKind::new(kind_name.clone(), behavior.clone())))
        });
    }

    pub fn factory_names(&self) -> Vec<String> {
        self.read_factories().names().into_iter().map(str::to_string).collect()
    }

    /// A fresh component id.
    pub fn next_component_id(&self) -> ComponentId {
        ComponentId(self.next_component.fetch_add(1, Ordering::Relaxed))
    }

    /// Build a component by factory name. It is not placed anywhere until a
    /// transaction adds it.
    pub fn create_component(
        &self,
        factory: &str,
        location: impl Into<Location>,
        attrs: AttributeSet,
    ) -> Result<Component> {
        let kind = self.read_factories().build(factory, &attrs)?;
        Ok(Component::new(self.next_component_id(), location.into(), factory, attrs, kind))
    }

    /// Build an instance of `circuit` anchored at `location`.
    pub fn create_subcircuit(&self, circuit: &Circuit, location: impl Into<Location>) -> Component {
        Component::new(
            self.next_component_id(),
            location.into(),
            SUBCIRCUIT,
            AttributeSet::new(),
            ComponentKind::Subcircuit(Subcircuit::of(circuit)),
        )
    }

    /// Start building changes to `circuit`.
    pub fn builder(&self, circuit: &Circuit) -> CircuitBuilder<'_> {
        CircuitBuilder {
            project: self,
            circuit: circuit.clone(),
            transaction: Transaction::new(),
        }
    }

    // ============ Transactions ============

    /// Apply a transaction atomically.
    ///
    /// Every circuit the transaction touches is locked for its duration,
    /// lowest id first. On error nothing is changed.
    ///
    /// Transactions that place subcircuit instances are checked for
    /// recursion one at a time, after their locks are taken, so two of them
    /// cannot close a cycle between them.
    ///
    /// # Panics
    ///
    /// If called from a circuit listener while that circuit is locked.
    pub fn submit(&self, transaction: &Transaction) -> Result<TransactionResult> {
        let places_instances = transaction
            .changes()
            .iter()
            .any(|change| !change.placed_templates().is_empty());

        loop {
            let requests = self.access_requests(transaction);
            let mut locks = LockSet::acquire(&requests);
            if !self.embedders_locked(transaction, &locks) {
                // an instance was placed while we were waiting
                debug!("embedder set changed during lock acquisition, retrying");
                drop(locks);
                continue;
            }
            let _placing = places_instances.then(|| self.lock_placing());
            self.check_recursion(transaction, &locks)?;

            let factories = self.read_factories();
            let mut mutator = Mutator::new(&mut locks, &factories);
            for change in transaction.changes() {
                if let Err(err) = mutator.apply(change) {
                    mutator.rollback();
                    warn!(error = %err, "transaction failed");
                    return Err(err);
                }
            }
            mutator.refresh_instances();
            let (result, structures) = mutator.commit();
            self.record_uses(&structures);
            return Ok(result);
        }
    }

    fn access_requests(&self, transaction: &Transaction) -> BTreeMap<CircuitId, (Circuit, Access)> {
        let mut requests = BTreeMap::new();
        for change in transaction.changes() {
            let circuit = change.circuit();
            locker::request(&mut requests, circuit, Access::Write);
            for template in change.placed_templates() {
                locker::request(&mut requests, &template, Access::Read);
            }
            if let CircuitChange::SetAttribute { component, .. } = change {
                let snapshot = circuit.snapshot();
                if let Some(sub) = snapshot.component(*component).and_then(|c| c.kind().as_subcircuit()) {
                    locker::request(&mut requests, sub.circuit(), Access::Read);
                }
            }
            if may_change_ports(change) {
                for user in self.embedders(circuit) {
                    locker::request(&mut requests, &user, Access::Write);
                }
            }
        }
        requests
    }

    fn embedders_locked(&self, transaction: &Transaction, locks: &LockSet<'_>) -> bool {
        let uses = self.lock_uses();
        transaction
            .changes()
            .iter()
            .filter(|change| may_change_ports(change))
            .flat_map(|change| embedders_in(&uses, change.circuit().id()))
            .all(|user| locks.access(user) == Some(Access::Write))
    }

    fn check_recursion(&self, transaction: &Transaction, locks: &LockSet<'_>) -> Result<()> {
        let mut uses = self.lock_uses().clone();
        for change in transaction.changes() {
            let user = change.circuit();
            for template in change.placed_templates() {
                if template.id() == user.id() || contains(&uses, template.id(), user.id()) {
                    let circuit = locks
                        .body(user.id())
                        .map_or_else(|| user.id().to_string(), |body| body.name.clone());
                    return Err(SimError::RecursiveSubcircuit { circuit });
                }
                *uses
                    .entry(user.id())
                    .or_default()
                    .entry(template.id())
                    .or_default() += 1;
            }
        }
        Ok(())
    }

    fn record_uses(&self, structures: &[Arc<Structure>]) {
        let mut uses = self.lock_uses();
        for structure in structures {
            let mut counts: BTreeMap<CircuitId, usize> = BTreeMap::new();
            for comp in structure.components() {
                if let Some(sub) = comp.kind().as_subcircuit() {
                    *counts.entry(sub.circuit().id()).or_default() += 1;
                }
            }
            if counts.is_empty() {
                uses.remove(&structure.circuit());
            } else {
                uses.insert(structure.circuit(), counts);
            }
        }
    }

    // ============ Simulation ============

    /// A propagator rooted at `circuit`, using this project's settings.
    pub fn new_propagator(&self, circuit: &Circuit) -> Propagator {
        Propagator::new(circuit, &self.config)
    }

    /// Report width conflicts and unconnected inputs of a circuit.
    pub fn validate(&self, circuit: &Circuit) -> Vec<Issue> {
        validate_structure(&circuit.snapshot())
    }
}

/// Users of `template` according to `uses`.
fn embedders_in(uses: &UseIndex, template: CircuitId) -> BTreeSet<CircuitId> {
    uses.iter()
        .filter(|(_, templates)| templates.contains_key(&template))
        .map(|(user, _)| *user)
        .collect()
}

/// Check if `outer` instantiates `inner`, directly or through other
/// subcircuits.
fn contains(uses: &UseIndex, outer: CircuitId, inner: CircuitId) -> bool {
    let mut stack = vec![outer];
    let mut seen = BTreeSet::new();
    while let Some(current) = stack.pop() {
        if !seen.insert(current) {
            continue;
        }
        if let Some(templates) = uses.get(&current) {
            if templates.contains_key(&inner) {
                return true;
            }
            stack.extend(templates.keys().copied());
        }
    }
    false
}

/// Check if a change may alter the pins of its circuit. Unknown components
/// count as pins.
fn may_change_ports(change: &CircuitChange) -> bool {
    let is_pin = |circuit: &Circuit, id: ComponentId| {
        circuit
            .snapshot()
            .component(id)
            .map_or(true, |c| c.kind().as_pin().is_some())
    };
    match change {
        CircuitChange::Add { component, .. } => component.kind().as_pin().is_some(),
        CircuitChange::Remove { circuit, component } => is_pin(circuit, *component),
        CircuitChange::Replace {
            circuit,
            removed,
            added,
        } => {
            added.iter().any(|c| c.kind().as_pin().is_some()) || removed.iter().any(|id| is_pin(circuit, *id))
        }
        CircuitChange::SetAttribute { circuit, component, .. } => is_pin(circuit, *component),
        CircuitChange::Clear { .. } => true,
        CircuitChange::AddWire { .. }
        | CircuitChange::RemoveWire { .. }
        | CircuitChange::SetCircuitAttribute { .. } => false,
    }
}

/// Collects components and wires for one circuit into a transaction.
pub struct CircuitBuilder<'p> {
    project: &'p Project,
    circuit: Circuit,
    transaction: Transaction,
}

impl CircuitBuilder<'_> {
    /// Place a component built by factory name.
    pub fn component(
        &mut self,
        factory: &str,
        location: impl Into<Location>,
        attrs: AttributeSet,
    ) -> Result<ComponentId> {
        let component = self.project.create_component(factory, location, attrs)?;
        let id = component.id();
        self.transaction = std::mem::take(&mut self.transaction).add(&self.circuit, component);
        Ok(id)
    }

    /// Place an instance of another circuit.
    pub fn subcircuit(&mut self, template: &Circuit, location: impl Into<Location>) -> ComponentId {
        let component = self.project.create_subcircuit(template, location);
        let id = component.id();
        self.transaction = std::mem::take(&mut self.transaction).add(&self.circuit, component);
        id
    }

    pub fn wire(&mut self, a: impl Into<Location>, b: impl Into<Location>) -> Result<&mut Self> {
        let wire = Wire::new(a, b)?;
        self.transaction = std::mem::take(&mut self.transaction).add_wire(&self.circuit, wire);
        Ok(self)
    }

    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Submit everything collected so far.
    pub fn commit(self) -> Result<TransactionResult> {
        self.project.submit(&self.transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{BitWidth, Value};
    use crossbeam::channel;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    fn project() -> Project {
        Project::new(SimulatorConfig::default()).unwrap()
    }

    fn pin(label: &str, output: bool) -> AttributeSet {
        AttributeSet::new().with("label", label).with("output", output)
    }

    /// `y = NOT a`
    fn inverter(project: &Project) -> Circuit {
        let circuit = project.add_circuit("inverter");
        let mut b = project.builder(&circuit);
        b.component("Pin", (0, 0), pin("a", false)).unwrap();
        b.component("NOT Gate", (60, 0), AttributeSet::new()).unwrap();
        b.component("Pin", (60, 0), pin("y", true)).unwrap();
        b.wire((0, 0), (30, 0)).unwrap();
        b.commit().unwrap();
        circuit
    }

    #[test]
    fn test_submit_commits_structure() {
        let project = project();
        let circuit = inverter(&project);
        let snap = circuit.snapshot();
        assert_eq!(snap.generation(), 1);
        assert_eq!(snap.component_count(), 3);
        assert_eq!(snap.ports().len(), 2);
        assert!(project.validate(&circuit).is_empty());
    }

    #[test]
    fn test_failed_transaction_rolls_back() {
        let project = project();
        let circuit = inverter(&project);
        let before = circuit.snapshot();
        let extra = project
            .create_component("Buffer", (200, 0), AttributeSet::new())
            .unwrap();
        let tx = Transaction::new()
            .add(&circuit, extra)
            .remove(&circuit, ComponentId(9999));
        let err = project.submit(&tx).unwrap_err();
        assert!(matches!(err, SimError::ComponentNotFound { .. }));
        let after = circuit.snapshot();
        assert_eq!(after.generation(), before.generation());
        assert_eq!(circuit.read_body().components.len(), 3);
    }

    #[test]
    fn test_reverse_transaction_restores() {
        let project = project();
        let circuit = inverter(&project);
        let gate = circuit
            .snapshot()
            .components()
            .find(|c| c.factory() == "NOT Gate")
            .map(Component::id)
            .unwrap();
        let result = project
            .submit(&Transaction::new().remove(&circuit, gate).clear(&circuit))
            .unwrap();
        assert_eq!(circuit.snapshot().component_count(), 0);
        assert!(circuit.snapshot().wires().is_empty());
        assert_eq!(result.modified_circuits(), &[circuit.clone()]);
        assert!(result
            .replacement_map(circuit.id())
            .and_then(|m| m.replacing(gate))
            .is_some_and(|r| r.is_empty()));

        project.submit(result.reverse()).unwrap();
        let snap = circuit.snapshot();
        assert_eq!(snap.component_count(), 3);
        assert!(snap.component(gate).is_some());
        assert_eq!(snap.wires().len(), 1);
    }

    #[test]
    fn test_set_attribute_rebuilds_kind() {
        let project = project();
        let circuit = inverter(&project);
        let a = circuit.snapshot().pin_named("a").map(Component::id).unwrap();
        let result = project
            .submit(&Transaction::new().set_attribute(&circuit, a, "width", 4))
            .unwrap();
        let snap = circuit.snapshot();
        let pin = snap.component(a).and_then(|c| c.kind().as_pin()).unwrap();
        assert_eq!(pin.width().bits(), 4);
        // the pin now disagrees with the gate input it is wired to
        assert!(!snap.width_incompatibilities().is_empty());

        project.submit(result.reverse()).unwrap();
        assert!(circuit.snapshot().width_incompatibilities().is_empty());
    }

    #[test]
    fn test_recursive_subcircuit_rejected() {
        let project = project();
        let inner = inverter(&project);
        let outer = project.add_circuit("outer");
        let mut b = project.builder(&outer);
        b.subcircuit(&inner, (100, 100));
        b.commit().unwrap();

        let self_instance = project.create_subcircuit(&outer, (0, 0));
        let err = project
            .submit(&Transaction::new().add(&outer, self_instance))
            .unwrap_err();
        assert!(matches!(err, SimError::RecursiveSubcircuit { .. }));

        let cycle = project.create_subcircuit(&outer, (0, 0));
        let err = project.submit(&Transaction::new().add(&inner, cycle)).unwrap_err();
        assert!(matches!(err, SimError::RecursiveSubcircuit { .. }));
        assert!(matches!(
            project.remove_circuit(&inner),
            Err(SimError::CircuitInUse { users: 1, .. })
        ));
    }

    #[test]
    fn test_pin_change_refreshes_instances() {
        let project = project();
        let inner = inverter(&project);
        let outer = project.add_circuit("outer");
        let mut b = project.builder(&outer);
        let instance = b.subcircuit(&inner, (100, 100));
        b.commit().unwrap();
        assert_eq!(project.embedders(&inner), vec![outer.clone()]);
        let ends_before = outer.snapshot().component(instance).unwrap().ends().len();
        assert_eq!(ends_before, 2);

        let extra = project.create_component("Pin", (0, 40), pin("b", false)).unwrap();
        let result = project.submit(&Transaction::new().add(&inner, extra)).unwrap();
        assert_eq!(result.modified_circuits().len(), 2);
        let comp = outer.snapshot().component(instance).cloned().unwrap();
        assert_eq!(comp.ends().len(), 3);
        assert!(comp.has_end_at(Location::new(100, 140)));
    }

    #[test]
    fn test_disjoint_transactions_run_concurrently() {
        let project = Arc::new(project());
        let circuits: Vec<Circuit> = (0..4).map(|i| project.add_circuit(&format!("c{}", i))).collect();
        let handles: Vec<_> = circuits
            .iter()
            .cloned()
            .map(|circuit| {
                let project = project.clone();
                thread::spawn(move || {
                    for i in 0..25 {
                        let comp = project
                            .create_component("Constant", (i * 10, 0), AttributeSet::new())
                            .unwrap();
                        project.submit(&Transaction::new().add(&circuit, comp)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for circuit in &circuits {
            let snap = circuit.snapshot();
            assert_eq!(snap.component_count(), 25);
            assert_eq!(snap.generation(), 25);
        }
    }

    #[test]
    fn test_disjoint_transaction_does_not_wait() {
        let project = Arc::new(project());
        let c0 = project.add_circuit("c0");
        let c1 = project.add_circuit("c1");

        // park c0's transaction inside its commit notification
        let (held_tx, held_rx) = channel::bounded(1);
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        c0.add_listener(move |_| {
            let _ = held_tx.try_send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        });
        let finished = Arc::new(AtomicBool::new(false));
        let first = project
            .create_component("Constant", (0, 0), AttributeSet::new())
            .unwrap();
        let parked = {
            let (project, c0, finished) = (project.clone(), c0.clone(), finished.clone());
            thread::spawn(move || {
                project.submit(&Transaction::new().add(&c0, first)).unwrap();
                finished.store(true, Ordering::SeqCst);
            })
        };
        held_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let second = project
            .create_component("Constant", (0, 0), AttributeSet::new())
            .unwrap();
        project.submit(&Transaction::new().add(&c1, second)).unwrap();
        assert_eq!(c1.snapshot().generation(), 1);
        assert!(!finished.load(Ordering::SeqCst));

        drop(release_tx);
        parked.join().unwrap();
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(c0.snapshot().generation(), 1);
    }

    #[test]
    fn test_overlapping_transactions_serialize() {
        let project = Arc::new(project());
        let a = project.add_circuit("a");
        let b = project.add_circuit("b");
        let log = Arc::new(Mutex::new(Vec::new()));
        for circuit in [&a, &b] {
            let log = log.clone();
            circuit.add_listener(move |event| {
                log.lock()
                    .unwrap()
                    .push((thread::current().id(), event.circuit, event.generation));
            });
        }
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let (project, a, b) = (project.clone(), a.clone(), b.clone());
                thread::spawn(move || {
                    for i in 0..20 {
                        let x = project
                            .create_component("Constant", (t * 1000 + i * 10, 0), AttributeSet::new())
                            .unwrap();
                        let y = project
                            .create_component("Constant", (t * 1000 + i * 10, 0), AttributeSet::new())
                            .unwrap();
                        // touch the circuits in opposite orders from different threads
                        let tx = if t % 2 == 0 {
                            Transaction::new().add(&a, x).add(&b, y)
                        } else {
                            Transaction::new().add(&b, y).add(&a, x)
                        };
                        project.submit(&tx).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(a.snapshot().component_count(), 80);
        assert_eq!(b.snapshot().component_count(), 80);
        assert_eq!(a.snapshot().generation(), 80);

        // each transaction commits and notifies both circuits before the
        // next one starts
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 160);
        for (k, pair) in log.chunks(2).enumerate() {
            let generation = k as u64 + 1;
            assert_eq!(pair[0].0, pair[1].0, "transaction {} interleaved", k);
            assert_eq!((pair[0].1, pair[0].2), (a.id(), generation));
            assert_eq!((pair[1].1, pair[1].2), (b.id(), generation));
        }
    }

    #[test]
    fn test_concurrent_instances_cannot_form_a_cycle() {
        let project = Arc::new(project());
        let a = project.add_circuit("a");
        let b = project.add_circuit("b");
        let c = project.add_circuit("c");
        let b_in_a = project.create_subcircuit(&b, (100, 100));
        let a_in_b = project.create_subcircuit(&a, (100, 100));

        // hold a and b locked while both placements are submitted
        let (held_tx, held_rx) = channel::bounded(1);
        let (release_tx, release_rx) = channel::bounded::<()>(0);
        c.add_listener(move |_| {
            let _ = held_tx.try_send(());
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        });
        let blocker = {
            let (project, a, b, c) = (project.clone(), a.clone(), b.clone(), c.clone());
            thread::spawn(move || {
                let mut tx = Transaction::new();
                for circuit in [&a, &b, &c] {
                    let comp = project
                        .create_component("Constant", (0, 0), AttributeSet::new())
                        .unwrap();
                    tx = tx.add(circuit, comp);
                }
                project.submit(&tx).unwrap();
            })
        };
        held_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let placers: Vec<_> = [(a.clone(), b_in_a), (b.clone(), a_in_b)]
            .into_iter()
            .map(|(user, instance)| {
                let project = project.clone();
                thread::spawn(move || project.submit(&Transaction::new().add(&user, instance)))
            })
            .collect();
        thread::sleep(Duration::from_millis(100));
        drop(release_tx);
        blocker.join().unwrap();

        let results: Vec<_> = placers.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(SimError::RecursiveSubcircuit { .. }))));
        let a_embeds_b = project.embedders(&b).contains(&a);
        let b_embeds_a = project.embedders(&a).contains(&b);
        assert!(a_embeds_b != b_embeds_a);
    }

    #[test]
    fn test_custom_factory() {
        #[derive(Debug)]
        struct High;
        impl CustomComponent for High {
            fn ends(&self, location: Location) -> Vec<crate::circuit::EndData> {
                vec![crate::circuit::EndData::output(location, BitWidth::ONE)]
            }
            fn propagate(&self, state: &mut crate::sim::InstanceState<'_>) -> Result<()> {
                state.set_port(0, Value::TRUE, 0)
            }
        }

        let project = project();
        project.register_custom("High", Arc::new(High));
        assert!(project.factory_names().iter().any(|n| n == "High"));
        let circuit = project.add_circuit("top");
        let mut b = project.builder(&circuit);
        b.component("High", (0, 0), AttributeSet::new()).unwrap();
        b.component("Pin", (0, 0), pin("out", true)).unwrap();
        b.commit().unwrap();

        let mut prop = project.new_propagator(&circuit);
        prop.propagate().unwrap();
        assert_eq!(prop.value(Location::new(0, 0)), Value::TRUE);
    }

    #[test]
    #[should_panic(expected = "listeners must not submit transactions")]
    fn test_listener_submit_panics() {
        let project = Arc::new(project());
        let circuit = project.add_circuit("top");
        let inner = project.clone();
        let target = circuit.clone();
        circuit.add_listener(move |_| {
            let comp = inner
                .create_component("Constant", (50, 50), AttributeSet::new())
                .unwrap();
            let _ = inner.submit(&Transaction::new().add(&target, comp));
        });
        let comp = project
            .create_component("Constant", (0, 0), AttributeSet::new())
            .unwrap();
        let _ = project.submit(&Transaction::new().add(&circuit, comp));
    }
}
