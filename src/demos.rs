//! Small ready-made circuits.
//!
//! Used by the `gatesim` binary and handy for experiments. Every builder
//! adds its circuits to the given project and returns the top circuit.

use crate::circuit::{AttributeSet, Circuit};
use crate::error::Result;
use crate::project::Project;

fn pin(label: &str, output: bool, width: u32) -> AttributeSet {
    AttributeSet::new()
        .with("label", label)
        .with("output", output)
        .with("width", width as i64)
}

/// Names accepted by [`build`].
pub const DEMOS: [&str; 4] = ["ring", "latch", "counter", "adder"];

/// Build a demo by name with its default size.
pub fn build(project: &Project, name: &str) -> Option<Result<Circuit>> {
    match name {
        "ring" => Some(ring(project, 3, 0)),
        "latch" => Some(latch(project)),
        "counter" => Some(counter(project, 4)),
        "adder" => Some(adder(project, 4)),
        _ => None,
    }
}

/// A ring of `stages` inverting gates. The first stage is a NOR gate with
/// the given delay whose other input is the `stop` pin, so the ring starts
/// from unknown values and holds still while `stop` is high. With an odd
/// stage count and zero delay it never settles.
///
/// Input: `stop`. Probe: `out`.
pub fn ring(project: &Project, stages: i32, delay: u32) -> Result<Circuit> {
    let circuit = project.add_circuit("ring");
    let mut b = project.builder(&circuit);
    let stages = stages.max(1);
    b.component("Pin", (0, -10), pin("stop", false, 1))?;
    b.component("NOR Gate", (60, 0), AttributeSet::new().with("delay", delay as i64))?;
    b.wire((0, -10), (30, -10))?;
    for i in 1..stages {
        b.component("NOT Gate", (60 * (i + 1), 0), AttributeSet::new())?;
        b.wire((60 * i, 0), (60 * i + 30, 0))?;
    }
    b.wire((60 * stages, 0), (30, 10))?;
    b.component("Pin", (60 * stages, 0), pin("out", true, 1))?;
    b.commit()?;
    Ok(circuit)
}

/// Set/reset latch from two cross-coupled NOR gates. The `qn` gate has a
/// one-tick delay so the latch comes up in a defined state.
///
/// Inputs: `s`, `r`. Probes: `q`, `qn`.
pub fn latch(project: &Project) -> Result<Circuit> {
    let circuit = project.add_circuit("latch");
    let mut b = project.builder(&circuit);
    b.component("Pin", (0, -10), pin("r", false, 1))?;
    b.component("Pin", (0, 110), pin("s", false, 1))?;
    b.component("NOR Gate", (100, 0), AttributeSet::new())?;
    b.component("NOR Gate", (100, 100), AttributeSet::new().with("delay", 1))?;
    b.component("Pin", (100, 0), pin("q", true, 1))?;
    b.component("Pin", (100, 100), pin("qn", true, 1))?;
    b.wire((0, -10), (70, -10))?
        .wire((0, 110), (70, 110))?
        .wire((100, 0), (70, 90))?
        .wire((100, 100), (70, 10))?;
    b.commit()?;
    Ok(circuit)
}

/// Ripple counter of `bits` D flip-flops driven by a clock. The count
/// advances on every rising clock edge, i.e. every second tick.
///
/// Probe: `count`.
pub fn counter(project: &Project, bits: i32) -> Result<Circuit> {
    let bits = bits.clamp(1, 16);
    let circuit = project.add_circuit("counter");
    let mut b = project.builder(&circuit);
    b.component("Clock", (100, 10), AttributeSet::new())?;
    for i in 0..bits {
        let y = 100 * i;
        let trigger = if i == 0 { "rising" } else { "falling" };
        b.component("D Flip-Flop", (200, y), AttributeSet::new().with("trigger", trigger))?;
        b.component("NOT Gate", (260, y + 40), AttributeSet::new())?;
        // Q -> NOT -> D
        b.wire((200, y), (230, y + 40))?.wire((260, y + 40), (170, y - 10))?;
        if i == 0 {
            b.wire((100, 10), (170, 10))?;
        } else {
            b.wire((200, y - 100), (170, y + 10))?;
        }
        b.wire((200, y), (420, 10 * (i + 1)))?;
    }
    b.component(
        "Splitter",
        (400, 0),
        AttributeSet::new()
            .with("incoming", bits as i64)
            .with("fanout", bits as i64),
    )?;
    b.component("Pin", (400, 0), pin("count", true, bits as u32))?;
    b.commit()?;
    Ok(circuit)
}

/// One-bit full adder built from gates.
///
/// Inputs: `a`, `b`, `cin`. Outputs: `s`, `cout`.
pub fn full_adder(project: &Project) -> Result<Circuit> {
    let circuit = project.add_circuit("full adder");
    let mut b = project.builder(&circuit);
    let (a, bb, cin) = ((0, 0), (0, 40), (0, 80));
    b.component("Pin", a, pin("a", false, 1))?;
    b.component("Pin", bb, pin("b", false, 1))?;
    b.component("Pin", cin, pin("cin", false, 1))?;
    b.component("Pin", (300, 0), pin("s", true, 1))?;
    b.component("Pin", (300, 80), pin("cout", true, 1))?;

    b.component("XOR Gate", (200, 0), AttributeSet::new().with("inputs", 3))?;
    b.wire(a, (170, -20))?
        .wire(bb, (170, 0))?
        .wire(cin, (170, 20))?
        .wire((200, 0), (300, 0))?;

    // carry is the majority of the three inputs
    for (i, (x, y)) in [(a, bb), (a, cin), (bb, cin)].into_iter().enumerate() {
        let gy = 120 + 60 * i as i32;
        b.component("AND Gate", (100, gy), AttributeSet::new())?;
        b.wire(x, (70, gy - 10))?
            .wire(y, (70, gy + 10))?
            .wire((100, gy), (170, 160 + 20 * i as i32))?;
    }
    b.component("OR Gate", (200, 180), AttributeSet::new().with("inputs", 3))?;
    b.wire((200, 180), (300, 80))?;
    b.commit()?;
    Ok(circuit)
}

/// Ripple-carry adder of `bits` full-adder instances.
///
/// Inputs: `a`, `b`. Probes: `sum`, `carry`.
pub fn adder(project: &Project, bits: i32) -> Result<Circuit> {
    let bits = bits.clamp(1, 16);
    let cell = full_adder(project)?;
    let circuit = project.add_circuit("adder");
    let mut b = project.builder(&circuit);
    let bus = AttributeSet::new()
        .with("incoming", bits as i64)
        .with("fanout", bits as i64);

    b.component("Pin", (0, 0), pin("a", false, bits as u32))?;
    b.component("Splitter", (0, 0), bus.clone())?;
    b.component("Pin", (0, -200), pin("b", false, bits as u32))?;
    b.component("Splitter", (0, -200), bus.clone())?;
    b.component("Pin", (800, 0), pin("sum", true, bits as u32))?;
    b.component("Splitter", (800, 0), bus)?;
    b.component("Constant", (100, 280), AttributeSet::new().with("value", 0))?;

    // instance ports: a (0,0) s (300,0) b (0,40) cin (0,80) cout (300,80)
    for k in 0..bits {
        let y = 200 + 200 * k;
        b.subcircuit(&cell, (200, y));
        b.wire((20, 10 * (k + 1)), (200, y))?
            .wire((20, -200 + 10 * (k + 1)), (200, y + 40))?
            .wire((500, y), (820, 10 * (k + 1)))?;
        if k == 0 {
            b.wire((100, 280), (200, y + 80))?;
        } else {
            b.wire((500, y - 120), (200, y + 80))?;
        }
    }
    b.component("Pin", (500, 200 * bits + 80), pin("carry", true, 1))?;
    b.commit()?;
    Ok(circuit)
}
