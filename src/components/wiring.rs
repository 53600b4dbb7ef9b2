//! Pins, constants and clocks.

use crate::circuit::{AttributeSet, EndData, Location};
use crate::error::Result;
use crate::sim::InstanceState;
use crate::value::{BitWidth, Value};

use super::{ComponentKind, FactoryContext, FactoryTable};

pub(crate) const PIN: &str = "Pin";
pub(crate) const CONSTANT: &str = "Constant";
pub(crate) const CLOCK: &str = "Clock";

/// Circuit interface point.
///
/// An input pin drives a value it holds in its [`PinState`]; an output pin
/// records the value it sees. Inside a subcircuit, input pins are fed from
/// the parent's ports and output pins drive them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pin {
    width: BitWidth,
    output: bool,
    label: String,
}

/// Value held by a pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinState {
    pub value: Value,
}

impl Pin {
    pub fn new(width: BitWidth, output: bool, label: impl Into<String>) -> Self {
        Self {
            width,
            output,
            label: label.into(),
        }
    }

    /// Create from `width`, `output` and `label` attributes.
    pub fn from_attrs(attrs: &AttributeSet, ctx: &FactoryContext) -> Result<Self> {
        Ok(Self::new(
            attrs.width(PIN, "width", 1, ctx.max_width)?,
            attrs.bool(PIN, "output", false)?,
            attrs.text(PIN, "label", "")?,
        ))
    }

    pub fn width(&self) -> BitWidth {
        self.width
    }

    /// Check if this is an output pin (reads the circuit).
    pub fn is_output(&self) -> bool {
        self.output
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Value an input pin drives before anything sets it.
    pub fn initial_value(&self) -> Value {
        Value::known(self.width, 0)
    }

    pub fn ends(&self, at: Location) -> Vec<EndData> {
        if self.output {
            vec![EndData::input(at, self.width)]
        } else {
            vec![EndData::output(at, self.width)]
        }
    }

    pub fn propagate(&self, state: &mut InstanceState<'_>) -> Result<()> {
        if self.output {
            let seen = state.port_value(0)?;
            let changed = state
                .data_or_insert_with(|| PinState { value: Value::unknown(self.width) })?
                .value
                != seen;
            state.set_data(PinState { value: seen });
            if changed {
                state.notify_parent();
            }
            Ok(())
        } else {
            let initial = self.initial_value();
            let value = state.data_or_insert_with(|| PinState { value: initial })?.value;
            state.set_port(0, value, 0)
        }
    }
}

/// Fixed value source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constant {
    value: Value,
}

impl Constant {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Create from `width` and `value` attributes. The default value is 1.
    pub fn from_attrs(attrs: &AttributeSet, ctx: &FactoryContext) -> Result<Self> {
        let width = attrs.width(CONSTANT, "width", 1, ctx.max_width)?;
        let bits = attrs.int(CONSTANT, "value", 1)?;
        Ok(Self::new(Value::known(width, bits as u64)))
    }

    pub fn value(&self) -> Value {
        self.value
    }

    pub fn ends(&self, at: Location) -> Vec<EndData> {
        vec![EndData::output(at, self.value.width())]
    }

    pub fn propagate(&self, state: &mut InstanceState<'_>) -> Result<()> {
        state.set_port(0, self.value, 0)
    }
}

/// Square-wave source driven by simulator ticks.
///
/// The output is low for `low` ticks, then high for `high` ticks. Each manual
/// toggle inverts the phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clock {
    high: u32,
    low: u32,
}

/// Output and manual toggle count of one clock instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockState {
    pub sending: Value,
    pub clicks: u32,
}

impl Default for ClockState {
    fn default() -> Self {
        Self {
            sending: Value::FALSE,
            clicks: 0,
        }
    }
}

impl Clock {
    pub fn new(high: u32, low: u32) -> Self {
        Self {
            high: high.max(1),
            low: low.max(1),
        }
    }

    /// Create from `high` and `low` attributes (both default 1).
    pub fn from_attrs(attrs: &AttributeSet, _ctx: &FactoryContext) -> Result<Self> {
        let high = attrs.int_in(CLOCK, "high", 1, 1, u32::MAX as i64)?;
        let low = attrs.int_in(CLOCK, "low", 1, 1, u32::MAX as i64)?;
        Ok(Self::new(high as u32, low as u32))
    }

    pub fn high(&self) -> u32 {
        self.high
    }

    pub fn low(&self) -> u32 {
        self.low
    }

    /// Level for tick `ticks` after `clicks` manual toggles.
    pub fn level(&self, ticks: u64, clicks: u32) -> Value {
        let period = self.high as u64 + self.low as u64;
        let base = Value::from_bool(ticks % period >= self.low as u64);
        if clicks % 2 == 1 {
            base.not()
        } else {
            base
        }
    }

    pub fn ends(&self, at: Location) -> Vec<EndData> {
        vec![EndData::output(at, BitWidth::ONE)]
    }

    pub fn tick(&self, state: &mut InstanceState<'_>, ticks: u64) -> Result<bool> {
        let data = state.data_or_insert_with(ClockState::default)?;
        let level = self.level(ticks, data.clicks);
        if data.sending == level {
            return Ok(false);
        }
        data.sending = level;
        state.mark_dirty();
        Ok(true)
    }

    pub fn propagate(&self, state: &mut InstanceState<'_>) -> Result<()> {
        let sending = state.data_or_insert_with(ClockState::default)?.sending;
        state.set_port(0, sending, 0)
    }
}

pub(crate) fn register(table: &mut FactoryTable) {
    table.register(PIN, |attrs, ctx| Pin::from_attrs(attrs, ctx).map(ComponentKind::Pin));
    table.register(CONSTANT, |attrs, ctx| {
        Constant::from_attrs(attrs, ctx).map(ComponentKind::Constant)
    });
    table.register(CLOCK, |attrs, ctx| Clock::from_attrs(attrs, ctx).map(ComponentKind::Clock));
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: FactoryContext = FactoryContext { max_width: 32 };

    #[test]
    fn test_clock_levels() {
        let clock = Clock::new(1, 1);
        let levels: Vec<Value> = (0..4).map(|t| clock.level(t, 0)).collect();
        assert_eq!(levels, vec![Value::FALSE, Value::TRUE, Value::FALSE, Value::TRUE]);
        assert_eq!(clock.level(0, 1), Value::TRUE);

        let slow = Clock::new(2, 3);
        let levels: Vec<bool> = (0..5).map(|t| slow.level(t, 0) == Value::TRUE).collect();
        assert_eq!(levels, vec![false, false, false, true, true]);
    }

    #[test]
    fn test_pin_ends() {
        let input = Pin::from_attrs(&AttributeSet::new().with("width", 4), &CTX).unwrap();
        assert!(input.ends(Location::new(0, 0))[0].direction.is_output());
        assert_eq!(input.initial_value().to_u64(), Some(0));

        let output = Pin::from_attrs(&AttributeSet::new().with("output", true), &CTX).unwrap();
        assert!(!output.ends(Location::new(0, 0))[0].direction.is_output());
    }

    #[test]
    fn test_constant_default() {
        let c = Constant::from_attrs(&AttributeSet::new(), &CTX).unwrap();
        assert_eq!(c.value(), Value::TRUE);
        let c = Constant::from_attrs(&AttributeSet::new().with("width", 8).with("value", 0x1ff), &CTX).unwrap();
        assert_eq!(c.value().to_u64(), Some(0xff));
    }
}
