//! Logic gates.

use crate::circuit::{AttributeSet, EndData, Location};
use crate::error::Result;
use crate::sim::InstanceState;
use crate::value::{BitWidth, Value};

use super::{ComponentKind, FactoryContext, FactoryTable};

/// Largest number of gate inputs.
pub const MAX_INPUTS: i64 = 32;

/// Boolean function computed by a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GateOp {
    And,
    Or,
    Nand,
    Nor,
    Xor,
    Xnor,
    Not,
    Buffer,
}

impl GateOp {
    pub const ALL: [GateOp; 8] = [
        GateOp::And,
        GateOp::Or,
        GateOp::Nand,
        GateOp::Nor,
        GateOp::Xor,
        GateOp::Xnor,
        GateOp::Not,
        GateOp::Buffer,
    ];

    /// Name the gate is registered under.
    pub fn factory_name(&self) -> &'static str {
        match self {
            GateOp::And => "AND Gate",
            GateOp::Or => "OR Gate",
            GateOp::Nand => "NAND Gate",
            GateOp::Nor => "NOR Gate",
            GateOp::Xor => "XOR Gate",
            GateOp::Xnor => "XNOR Gate",
            GateOp::Not => "NOT Gate",
            GateOp::Buffer => "Buffer",
        }
    }

    /// Check if the gate takes exactly one input.
    pub fn is_unary(&self) -> bool {
        matches!(self, GateOp::Not | GateOp::Buffer)
    }

    /// Evaluate over the driven inputs. With no driven input the output floats.
    pub fn evaluate(&self, inputs: &[Value], width: BitWidth) -> Value {
        let Some((first, rest)) = inputs.split_first() else {
            return Value::unknown(width);
        };
        let fold = |f: fn(&Value, Value) -> Value| rest.iter().fold(*first, |acc, v| f(&acc, *v));
        match self {
            GateOp::And => fold(Value::and),
            GateOp::Or => fold(Value::or),
            GateOp::Nand => fold(Value::and).not(),
            GateOp::Nor => fold(Value::or).not(),
            // multi-input XOR is odd parity
            GateOp::Xor => fold(Value::xor),
            GateOp::Xnor => fold(Value::xor).not(),
            GateOp::Not => first.not(),
            GateOp::Buffer => *first,
        }
    }
}

/// A gate with `inputs` inputs of `width` bits.
///
/// Port 0 is the output, ports `1..=inputs` are the inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gate {
    op: GateOp,
    inputs: usize,
    width: BitWidth,
    delay: u32,
}

impl Gate {
    /// Create a gate directly.
    pub fn new(op: GateOp, inputs: usize, width: BitWidth, delay: u32) -> Self {
        let inputs = if op.is_unary() { 1 } else { inputs.max(1) };
        Self {
            op,
            inputs,
            width,
            delay,
        }
    }

    /// Create a gate from attributes (`inputs`, `width`, `delay`).
    pub fn from_attrs(op: GateOp, attrs: &AttributeSet, ctx: &FactoryContext) -> Result<Self> {
        let owner = op.factory_name();
        let inputs = if op.is_unary() {
            1
        } else {
            attrs.int_in(owner, "inputs", 2, 1, MAX_INPUTS)? as usize
        };
        let width = attrs.width(owner, "width", 1, ctx.max_width)?;
        let delay = attrs.delay(owner)?;
        Ok(Self::new(op, inputs, width, delay))
    }

    pub fn op(&self) -> GateOp {
        self.op
    }

    pub fn inputs(&self) -> usize {
        self.inputs
    }

    pub fn width(&self) -> BitWidth {
        self.width
    }

    pub fn ends(&self, at: Location) -> Vec<EndData> {
        let n = self.inputs as i32;
        let mut ends = Vec::with_capacity(self.inputs + 1);
        ends.push(EndData::output(at, self.width));
        for i in 0..n {
            ends.push(EndData::input(
                at.translate(-30, -10 * (n - 1) + 20 * i),
                self.width,
            ));
        }
        ends
    }

    pub fn propagate(&self, state: &mut InstanceState<'_>) -> Result<()> {
        let mut driven = Vec::with_capacity(self.inputs);
        for port in 1..=self.inputs {
            let v = state.port_value(port)?;
            // an unconnected input does not take part
            if !v.is_nil() && !v.is_unknown() {
                driven.push(v);
            }
        }
        let out = self.op.evaluate(&driven, self.width);
        state.set_port(0, out, self.delay)
    }
}

pub(crate) fn register(table: &mut FactoryTable) {
    for op in GateOp::ALL {
        table.register(op.factory_name(), move |attrs, ctx| {
            Gate::from_attrs(op, attrs, ctx).map(ComponentKind::Gate)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> FactoryContext {
        FactoryContext { max_width: 32 }
    }

    #[test]
    fn test_gate_truth_tables() {
        let one = BitWidth::ONE;
        let (t, f) = (Value::TRUE, Value::FALSE);
        assert_eq!(GateOp::And.evaluate(&[t, t], one), t);
        assert_eq!(GateOp::And.evaluate(&[t, f], one), f);
        assert_eq!(GateOp::Nand.evaluate(&[t, t], one), f);
        assert_eq!(GateOp::Or.evaluate(&[f, f], one), f);
        assert_eq!(GateOp::Nor.evaluate(&[f, f], one), t);
        assert_eq!(GateOp::Xor.evaluate(&[t, t, t], one), t);
        assert_eq!(GateOp::Xnor.evaluate(&[t, f], one), f);
        assert_eq!(GateOp::Not.evaluate(&[f], one), t);
    }

    #[test]
    fn test_dominant_inputs() {
        let one = BitWidth::ONE;
        assert_eq!(GateOp::And.evaluate(&[Value::FALSE, Value::ERROR], one), Value::FALSE);
        assert_eq!(GateOp::Or.evaluate(&[Value::TRUE, Value::ERROR], one), Value::TRUE);
        assert_eq!(GateOp::Nor.evaluate(&[Value::TRUE, Value::ERROR], one), Value::FALSE);
        assert_eq!(GateOp::And.evaluate(&[Value::TRUE, Value::ERROR], one), Value::ERROR);
        assert_eq!(GateOp::Xor.evaluate(&[], one), Value::UNKNOWN);
    }

    #[test]
    fn test_gate_from_attrs() {
        let gate = Gate::from_attrs(
            GateOp::And,
            &AttributeSet::new().with("inputs", 3).with("width", 4),
            &ctx(),
        )
        .unwrap();
        assert_eq!(gate.inputs(), 3);
        let ends = gate.ends(Location::new(100, 100));
        assert_eq!(ends.len(), 4);
        assert!(ends[0].direction.is_output());
        assert_eq!(ends[1].location, Location::new(70, 80));
        assert_eq!(ends[3].location, Location::new(70, 120));

        let not = Gate::from_attrs(GateOp::Not, &AttributeSet::new().with("inputs", 5), &ctx()).unwrap();
        assert_eq!(not.inputs(), 1);
        assert_eq!(not.ends(Location::new(0, 0))[1].location, Location::new(-30, 0));

        assert!(Gate::from_attrs(GateOp::Or, &AttributeSet::new().with("inputs", 99), &ctx()).is_err());
        assert!(Gate::from_attrs(GateOp::Or, &AttributeSet::new().with("delay", -1), &ctx()).is_err());
    }
}
