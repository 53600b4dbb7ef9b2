//! Edge-triggered storage.

use crate::circuit::{AttributeSet, EndData, Location};
use crate::error::{Result, SimError};
use crate::sim::InstanceState;
use crate::value::{BitWidth, Value};

use super::{ComponentKind, FactoryContext, FactoryTable};

pub(crate) const D_FLIP_FLOP: &str = "D Flip-Flop";

/// Clock edge that captures the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Rising,
    Falling,
}

impl Trigger {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "rising" => Ok(Trigger::Rising),
            "falling" => Ok(Trigger::Falling),
            other => Err(SimError::invalid_attribute(
                D_FLIP_FLOP,
                "trigger",
                format!("expected \"rising\" or \"falling\", found {:?}", other),
            )),
        }
    }

    /// Check if moving from `last` to `now` is the capturing edge.
    pub fn is_edge(&self, last: Value, now: Value) -> bool {
        match self {
            Trigger::Rising => last == Value::FALSE && now == Value::TRUE,
            Trigger::Falling => last == Value::TRUE && now == Value::FALSE,
        }
    }
}

/// A `width`-bit D flip-flop.
///
/// Port 0 is Q, port 1 is D, port 2 is the clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DFlipFlop {
    width: BitWidth,
    trigger: Trigger,
    delay: u32,
}

/// Stored contents and the clock level seen on the previous evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlipFlopState {
    pub stored: Value,
    pub last_clock: Value,
}

impl DFlipFlop {
    pub fn new(width: BitWidth, trigger: Trigger, delay: u32) -> Self {
        Self {
            width,
            trigger,
            delay,
        }
    }

    /// Create from `width`, `trigger` and `delay` attributes.
    pub fn from_attrs(attrs: &AttributeSet, ctx: &FactoryContext) -> Result<Self> {
        Ok(Self::new(
            attrs.width(D_FLIP_FLOP, "width", 1, ctx.max_width)?,
            Trigger::parse(&attrs.text(D_FLIP_FLOP, "trigger", "rising")?)?,
            attrs.delay(D_FLIP_FLOP)?,
        ))
    }

    pub fn width(&self) -> BitWidth {
        self.width
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn ends(&self, at: Location) -> Vec<EndData> {
        vec![
            EndData::output(at, self.width),
            EndData::input(at.translate(-30, -10), self.width),
            EndData::input(at.translate(-30, 10), BitWidth::ONE),
        ]
    }

    pub fn propagate(&self, state: &mut InstanceState<'_>) -> Result<()> {
        let d = state.port_value(1)?;
        let clock = state.port_value(2)?;
        let width = self.width;
        let data = state.data_or_insert_with(|| FlipFlopState {
            stored: Value::known(width, 0),
            last_clock: Value::UNKNOWN,
        })?;
        if self.trigger.is_edge(data.last_clock, clock) {
            data.stored = d;
        }
        data.last_clock = clock;
        let q = data.stored;
        state.set_port(0, q, self.delay)
    }
}

pub(crate) fn register(table: &mut FactoryTable) {
    table.register(D_FLIP_FLOP, |attrs, ctx| {
        DFlipFlop::from_attrs(attrs, ctx).map(ComponentKind::FlipFlop)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edges() {
        assert!(Trigger::Rising.is_edge(Value::FALSE, Value::TRUE));
        assert!(!Trigger::Rising.is_edge(Value::UNKNOWN, Value::TRUE));
        assert!(!Trigger::Rising.is_edge(Value::TRUE, Value::FALSE));
        assert!(Trigger::Falling.is_edge(Value::TRUE, Value::FALSE));
    }

    #[test]
    fn test_trigger_attribute() {
        let ctx = FactoryContext { max_width: 32 };
        let ff = DFlipFlop::from_attrs(&AttributeSet::new().with("trigger", "falling"), &ctx).unwrap();
        assert_eq!(ff.trigger(), Trigger::Falling);
        assert!(DFlipFlop::from_attrs(&AttributeSet::new().with("trigger", "both"), &ctx).is_err());
    }
}
