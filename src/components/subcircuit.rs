//! Subcircuit instances.

use std::fmt;

use crate::circuit::{Circuit, Direction, EndData, Location, PortInfo};
use crate::error::Result;
use crate::sim::InstanceState;

/// An instance of another circuit.
///
/// Its ports mirror the child circuit's pins, ordered by pin location, and
/// sit at the pin locations offset by the instance anchor. Input ports feed
/// the child's input pins; the child's output pins drive the output ports.
#[derive(Clone)]
pub struct Subcircuit {
    circuit: Circuit,
    ports: Vec<PortInfo>,
}

impl Subcircuit {
    pub fn new(circuit: Circuit, ports: Vec<PortInfo>) -> Self {
        Self { circuit, ports }
    }

    /// Instance of `circuit` with ports taken from its committed structure.
    pub fn of(circuit: &Circuit) -> Self {
        let ports = circuit.snapshot().ports().to_vec();
        Self::new(circuit.clone(), ports)
    }

    pub fn circuit(&self) -> &Circuit {
        &self.circuit
    }

    pub fn ports(&self) -> &[PortInfo] {
        &self.ports
    }

    /// Index of the port backed by the child pin labelled `label`.
    pub fn port_named(&self, label: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.label == label)
    }

    pub fn ends(&self, at: Location) -> Vec<EndData> {
        self.ports
            .iter()
            .map(|p| {
                let direction = if p.output {
                    Direction::Output
                } else {
                    Direction::Input
                };
                EndData::new(at.offset_by(p.location), p.width, direction)
            })
            .collect()
    }

    pub fn propagate(&self, state: &mut InstanceState<'_>) -> Result<()> {
        let child = state.substate(&self.circuit)?;
        for (port, info) in self.ports.iter().enumerate() {
            if info.output {
                let value = state.child_value(child, info.location);
                state.set_port(port, value, 0)?;
            } else {
                let value = state.port_value(port)?;
                state.feed_child_pin(child, info.pin, value);
            }
        }
        Ok(())
    }
}

impl PartialEq for Subcircuit {
    fn eq(&self, other: &Self) -> bool {
        self.circuit.id() == other.circuit.id() && self.ports == other.ports
    }
}

impl fmt::Debug for Subcircuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subcircuit")
            .field("circuit", &self.circuit.id())
            .field("ports", &self.ports.len())
            .finish()
    }
}
