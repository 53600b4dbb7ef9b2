//! Ordered acquisition of circuit locks.
//!
//! Every transaction takes all the locks it needs up front, in ascending
//! [`CircuitId`] order, so two transactions can never wait on each other in
//! a cycle. A thread that already holds a circuit lock may not start another
//! transaction touching it; that is reported as a panic instead of a
//! deadlock.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::circuit::{Circuit, CircuitBody, CircuitId};

/// Kind of access a transaction needs to a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Access {
    Read,
    Write,
}

thread_local! {
    static HELD: RefCell<BTreeSet<CircuitId>> = RefCell::new(BTreeSet::new());
}

pub(crate) enum Guard<'a> {
    Read(RwLockReadGuard<'a, CircuitBody>),
    Write(RwLockWriteGuard<'a, CircuitBody>),
}

/// Locks held by one transaction. Released on drop.
pub(crate) struct LockSet<'a> {
    guards: BTreeMap<CircuitId, (&'a Circuit, Guard<'a>)>,
}

impl<'a> LockSet<'a> {
    /// Lock every requested circuit, lowest id first. When a circuit is
    /// requested more than once, the strongest access wins.
    ///
    /// # Panics
    ///
    /// If the calling thread already holds a lock on any of the circuits.
    pub(crate) fn acquire(requests: &'a BTreeMap<CircuitId, (Circuit, Access)>) -> Self {
        HELD.with(|held| {
            let held = held.borrow();
            if let Some(id) = requests.keys().find(|id| held.contains(id)) {
                panic!(
                    "circuit {} is already locked by this thread; \
                     circuit listeners must not submit transactions",
                    id
                );
            }
        });

        let mut guards = BTreeMap::new();
        for (id, (circuit, access)) in requests {
            let guard = match access {
                Access::Read => Guard::Read(circuit.read_body()),
                Access::Write => Guard::Write(circuit.write_body()),
            };
            HELD.with(|held| held.borrow_mut().insert(*id));
            guards.insert(*id, (circuit, guard));
        }
        trace!(circuits = guards.len(), "locks acquired");
        Self { guards }
    }

    pub(crate) fn access(&self, id: CircuitId) -> Option<Access> {
        self.guards.get(&id).map(|(_, guard)| match guard {
            Guard::Read(_) => Access::Read,
            Guard::Write(_) => Access::Write,
        })
    }

    /// Read view of a locked circuit.
    pub(crate) fn body(&self, id: CircuitId) -> Option<&CircuitBody> {
        self.guards.get(&id).map(|(_, guard)| match guard {
            Guard::Read(g) => &**g,
            Guard::Write(g) => &**g,
        })
    }

    /// Write view of a write-locked circuit.
    pub(crate) fn body_mut(&mut self, id: CircuitId) -> Option<&mut CircuitBody> {
        match self.guards.get_mut(&id) {
            Some((_, Guard::Write(g))) => Some(&mut **g),
            _ => None,
        }
    }

    /// Write-locked circuits in id order.
    pub(crate) fn written(&self) -> Vec<&'a Circuit> {
        self.guards
            .values()
            .filter(|(_, guard)| matches!(guard, Guard::Write(_)))
            .map(|(circuit, _)| *circuit)
            .collect()
    }
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        let ids: Vec<CircuitId> = self.guards.keys().copied().collect();
        self.guards.clear();
        HELD.with(|held| {
            let mut held = held.borrow_mut();
            for id in ids {
                held.remove(&id);
            }
        });
    }
}

/// Merge one access request into a request table.
pub(crate) fn request(
    requests: &mut BTreeMap<CircuitId, (Circuit, Access)>,
    circuit: &Circuit,
    access: Access,
) {
    let entry = requests
        .entry(circuit.id())
        .or_insert_with(|| (circuit.clone(), access));
    entry.1 = entry.1.max(access);
}
