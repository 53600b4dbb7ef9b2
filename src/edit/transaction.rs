//! Batched circuit edits.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use crate::circuit::{
    AttrValue, AttributeSet, Circuit, CircuitBody, CircuitEvent, CircuitId, Component, ComponentId, Structure, Wire,
};
use crate::components::{ComponentKind, FactoryTable, Subcircuit};
use crate::error::{Result, SimError};

use super::change::{AppliedChange, CircuitChange};
use super::locker::LockSet;
use super::replacement::ReplacementMap;

/// An ordered batch of edits applied atomically by
/// [`Project::submit`](crate::Project::submit).
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    changes: Vec<CircuitChange>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, change: CircuitChange) -> &mut Self {
        self.changes.push(change);
        self
    }

    /// Place a component.
    pub fn add(mut self, circuit: &Circuit, component: Component) -> Self {
        self.changes.push(CircuitChange::Add {
            circuit: circuit.clone(),
            component,
        });
        self
    }

    pub fn remove(mut self, circuit: &Circuit, component: ComponentId) -> Self {
        self.changes.push(CircuitChange::Remove {
            circuit: circuit.clone(),
            component,
        });
        self
    }

    pub fn add_wire(mut self, circuit: &Circuit, wire: Wire) -> Self {
        self.changes.push(CircuitChange::AddWire {
            circuit: circuit.clone(),
            wire,
        });
        self
    }

    pub fn remove_wire(mut self, circuit: &Circuit, wire: Wire) -> Self {
        self.changes.push(CircuitChange::RemoveWire {
            circuit: circuit.clone(),
            wire,
        });
        self
    }

    /// Swap `removed` for `added` in one step.
    pub fn replace(mut self, circuit: &Circuit, removed: Vec<ComponentId>, added: Vec<Component>) -> Self {
        self.changes.push(CircuitChange::Replace {
            circuit: circuit.clone(),
            removed,
            added,
        });
        self
    }

    pub fn set_attribute(
        mut self,
        circuit: &Circuit,
        component: ComponentId,
        key: &str,
        value: impl Into<AttrValue>,
    ) -> Self {
        self.changes.push(CircuitChange::SetAttribute {
            circuit: circuit.clone(),
            component,
            key: key.to_string(),
            value: Some(value.into()),
        });
        self
    }

    pub fn set_circuit_attribute(mut self, circuit: &Circuit, key: &str, value: impl Into<AttrValue>) -> Self {
        self.changes.push(CircuitChange::SetCircuitAttribute {
            circuit: circuit.clone(),
            key: key.to_string(),
            value: Some(value.into()),
        });
        self
    }

    pub fn clear(mut self, circuit: &Circuit) -> Self {
        self.changes.push(CircuitChange::Clear {
            circuit: circuit.clone(),
        });
        self
    }

    pub fn changes(&self) -> &[CircuitChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// What a committed transaction did.
#[derive(Debug, Clone)]
pub struct TransactionResult {
    reverse: Transaction,
    replacements: BTreeMap<CircuitId, ReplacementMap>,
    modified: Vec<Circuit>,
}

impl TransactionResult {
    /// Transaction that undoes this one.
    pub fn reverse(&self) -> &Transaction {
        &self.reverse
    }

    pub fn into_reverse(self) -> Transaction {
        self.reverse
    }

    /// Accumulated replacements in one circuit.
    pub fn replacement_map(&self, circuit: CircuitId) -> Option<&ReplacementMap> {
        self.replacements.get(&circuit)
    }

    /// Circuits whose structure changed, in id order.
    pub fn modified_circuits(&self) -> &[Circuit] {
        &self.modified
    }
}

type Backup = (AttributeSet, BTreeMap<ComponentId, Component>, BTreeSet<Wire>);

/// Applies edits to write-locked circuits and records how to undo them.
///
/// # Panics
///
/// Every mutating method panics with a lock violation if the circuit was
/// not write-locked for this transaction.
pub struct Mutator<'l, 'a> {
    locks: &'l mut LockSet<'a>,
    factories: &'l FactoryTable,
    log: Vec<AppliedChange>,
    replacements: BTreeMap<CircuitId, ReplacementMap>,
    modified: BTreeMap<CircuitId, Circuit>,
    backups: BTreeMap<CircuitId, Backup>,
}

impl<'l, 'a> Mutator<'l, 'a> {
    pub(crate) fn new(locks: &'l mut LockSet<'a>, factories: &'l FactoryTable) -> Self {
        Self {
            locks,
            factories,
            log: Vec::new(),
            replacements: BTreeMap::new(),
            modified: BTreeMap::new(),
            backups: BTreeMap::new(),
        }
    }

    fn body_mut(&mut self, circuit: &Circuit) -> &mut CircuitBody {
        let id = circuit.id();
        if !self.backups.contains_key(&id) {
            let Some(body) = self.locks.body(id) else {
                panic!("LockViolation: circuit {} was not locked by this transaction", id);
            };
            let backup = (body.attrs.clone(), body.components.clone(), body.wires.clone());
            self.backups.insert(id, backup);
        }
        match self.locks.body_mut(id) {
            Some(body) => body,
            None => panic!("LockViolation: circuit {} is not write-locked by this transaction", id),
        }
    }

    fn touch(&mut self, circuit: &Circuit, map: ReplacementMap) {
        self.modified.entry(circuit.id()).or_insert_with(|| circuit.clone());
        self.replacements.entry(circuit.id()).or_default().append(&map);
    }

    /// Apply one change.
    pub fn apply(&mut self, change: &CircuitChange) -> Result<()> {
        match change {
            CircuitChange::Add { circuit, component } => self.add(circuit, component.clone()),
            CircuitChange::Remove { circuit, component } => self.remove(circuit, *component),
            CircuitChange::AddWire { circuit, wire } => {
                self.add_wire(circuit, *wire);
                Ok(())
            }
            CircuitChange::RemoveWire { circuit, wire } => {
                self.remove_wire(circuit, *wire);
                Ok(())
            }
            CircuitChange::Replace {
                circuit,
                removed,
                added,
            } => self.replace(circuit, removed, added.clone()),
            CircuitChange::SetAttribute {
                circuit,
                component,
                key,
                value,
            } => self.set_attribute(circuit, *component, key, value.clone()),
            CircuitChange::SetCircuitAttribute { circuit, key, value } => {
                self.set_circuit_attribute(circuit, key, value.clone());
                Ok(())
            }
            CircuitChange::Clear { circuit } => {
                self.clear(circuit);
                Ok(())
            }
        }
    }

    /// Refresh the ports of a subcircuit instance from its locked template.
    fn with_current_ports(&self, component: Component) -> Component {
        let Some(sub) = component.kind().as_subcircuit() else {
            return component;
        };
        match self.locks.body(sub.circuit().id()) {
            Some(template) => {
                let kind = ComponentKind::Subcircuit(Subcircuit::new(sub.circuit().clone(), template.ports()));
                component.rebuilt(component.attrs().clone(), kind)
            }
            None => component,
        }
    }

    pub fn add(&mut self, circuit: &Circuit, component: Component) -> Result<()> {
        let component = self.with_current_ports(component);
        self.body_mut(circuit)
            .components
            .insert(component.id(), component.clone());
        let mut map = ReplacementMap::new();
        map.add(component.id());
        self.touch(circuit, map);
        self.log.push(AppliedChange::Added(circuit.clone(), component));
        Ok(())
    }

    pub fn remove(&mut self, circuit: &Circuit, id: ComponentId) -> Result<()> {
        let removed = self
            .body_mut(circuit)
            .components
            .remove(&id)
            .ok_or(SimError::ComponentNotFound {
                circuit: circuit.id(),
                component: id,
            })?;
        let mut map = ReplacementMap::new();
        map.remove(id);
        self.touch(circuit, map);
        self.log.push(AppliedChange::Removed(circuit.clone(), removed));
        Ok(())
    }

    pub fn add_wire(&mut self, circuit: &Circuit, wire: Wire) {
        if self.body_mut(circuit).wires.insert(wire) {
            self.touch(circuit, ReplacementMap::new());
            self.log.push(AppliedChange::WireAdded(circuit.clone(), wire));
        }
    }

    pub fn remove_wire(&mut self, circuit: &Circuit, wire: Wire) {
        if self.body_mut(circuit).wires.remove(&wire) {
            self.touch(circuit, ReplacementMap::new());
            self.log.push(AppliedChange::WireRemoved(circuit.clone(), wire));
        }
    }

    pub fn replace(&mut self, circuit: &Circuit, removed: &[ComponentId], added: Vec<Component>) -> Result<()> {
        let added: Vec<Component> = added.into_iter().map(|c| self.with_current_ports(c)).collect();
        let body = self.body_mut(circuit);
        let mut gone = Vec::with_capacity(removed.len());
        for id in removed {
            let comp = body.components.remove(id).ok_or(SimError::ComponentNotFound {
                circuit: circuit.id(),
                component: *id,
            })?;
            gone.push(comp);
        }
        for comp in &added {
            body.components.insert(comp.id(), comp.clone());
        }

        let mut map = ReplacementMap::new();
        for old in &gone {
            map.put(old.id(), added.iter().map(Component::id));
        }
        if gone.is_empty() {
            for comp in &added {
                map.add(comp.id());
            }
        }
        self.touch(circuit, map.clone());
        self.log.push(AppliedChange::Replaced {
            circuit: circuit.clone(),
            removed: gone,
            added,
            map,
        });
        Ok(())
    }

    /// Set or clear a component attribute, rebuilding its behaviour.
    pub fn set_attribute(
        &mut self,
        circuit: &Circuit,
        id: ComponentId,
        key: &str,
        value: Option<AttrValue>,
    ) -> Result<()> {
        let current = self
            .locks
            .body(circuit.id())
            .and_then(|b| b.components.get(&id))
            .cloned()
            .ok_or(SimError::ComponentNotFound {
                circuit: circuit.id(),
                component: id,
            })?;
        let mut attrs = current.attrs().clone();
        let old = match value.clone() {
            Some(v) => attrs.set(key, v),
            None => attrs.remove(key),
        };
        let kind = match current.kind() {
            ComponentKind::Subcircuit(s) => ComponentKind::Subcircuit(s.clone()),
            _ => self.factories.build(current.factory(), &attrs)?,
        };
        let updated = self.with_current_ports(current.rebuilt(attrs, kind));
        self.body_mut(circuit).components.insert(id, updated);
        self.touch(circuit, ReplacementMap::new());
        self.log.push(AppliedChange::AttributeSet {
            circuit: circuit.clone(),
            component: id,
            key: key.to_string(),
            old,
            new: value,
        });
        Ok(())
    }

    pub fn set_circuit_attribute(&mut self, circuit: &Circuit, key: &str, value: Option<AttrValue>) {
        let attrs = &mut self.body_mut(circuit).attrs;
        let old = match value.clone() {
            Some(v) => attrs.set(key, v),
            None => attrs.remove(key),
        };
        self.touch(circuit, ReplacementMap::new());
        self.log.push(AppliedChange::CircuitAttributeSet {
            circuit: circuit.clone(),
            key: key.to_string(),
            old,
            new: value,
        });
    }

    pub fn clear(&mut self, circuit: &Circuit) {
        let body = self.body_mut(circuit);
        let components: Vec<Component> = std::mem::take(&mut body.components).into_values().collect();
        let wires: Vec<Wire> = std::mem::take(&mut body.wires).into_iter().collect();
        if components.is_empty() && wires.is_empty() {
            return;
        }
        let mut map = ReplacementMap::new();
        for comp in &components {
            map.remove(comp.id());
        }
        self.touch(circuit, map);
        self.log.push(AppliedChange::Cleared {
            circuit: circuit.clone(),
            components,
            wires,
        });
    }

    /// Give subcircuit instances of every template whose pins changed the
    /// template's new ports.
    pub(crate) fn refresh_instances(&mut self) {
        let mut changed = Vec::new();
        for circuit in self.modified.values() {
            if let Some(body) = self.locks.body(circuit.id()) {
                let ports = body.ports();
                if ports.as_slice() != body.committed().ports() {
                    changed.push((circuit.clone(), ports));
                }
            }
        }
        if changed.is_empty() {
            return;
        }

        for user in self.locks.written() {
            let Some(body) = self.locks.body(user.id()) else {
                continue;
            };
            let stale: Vec<Component> = body
                .components
                .values()
                .filter_map(|comp| {
                    let sub = comp.kind().as_subcircuit()?;
                    let (template, ports) = changed.iter().find(|(c, _)| c.id() == sub.circuit().id())?;
                    let kind = ComponentKind::Subcircuit(Subcircuit::new(template.clone(), ports.clone()));
                    Some(comp.rebuilt(comp.attrs().clone(), kind))
                })
                .collect();
            if stale.is_empty() {
                continue;
            }
            debug!(circuit = %user.id(), instances = stale.len(), "refreshing subcircuit ports");
            let body = self.body_mut(user);
            for comp in stale {
                body.components.insert(comp.id(), comp);
            }
            self.touch(user, ReplacementMap::new());
        }
    }

    /// Put every touched circuit back the way it was.
    pub(crate) fn rollback(mut self) {
        let backups = std::mem::take(&mut self.backups);
        for (id, (attrs, components, wires)) in backups {
            if let Some(body) = self.locks.body_mut(id) {
                body.attrs = attrs;
                body.components = components;
                body.wires = wires;
            }
        }
        debug!(changes = self.log.len(), "transaction rolled back");
    }

    /// Rebuild the structure of every modified circuit, notify its
    /// listeners and describe the result.
    pub(crate) fn commit(mut self) -> (TransactionResult, Vec<Arc<Structure>>) {
        let mut structures = Vec::new();
        for (id, circuit) in &self.modified {
            let Some(body) = self.locks.body_mut(*id) else {
                continue;
            };
            let structure = body.commit(*id);
            let event = CircuitEvent {
                circuit: *id,
                generation: structure.generation(),
                replacements: self.replacements.get(id).cloned().unwrap_or_default(),
            };
            circuit.fire(&event);
            structures.push(structure);
        }

        let mut reverse = Transaction::new();
        for applied in self.log.iter().rev() {
            for change in applied.reverse() {
                reverse.push(change);
            }
        }
        let modified: Vec<Circuit> = std::mem::take(&mut self.modified).into_values().collect();
        debug!(
            changes = self.log.len(),
            circuits = modified.len(),
            "transaction committed"
        );
        let result = TransactionResult {
            reverse,
            replacements: std::mem::take(&mut self.replacements),
            modified,
        };
        (result, structures)
    }
}
