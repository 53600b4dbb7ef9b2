//! Component and circuit attributes.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Result, SimError};
use crate::value::{BitWidth, Value};

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Int(i64),
    Bool(bool),
    Text(String),
    /// Per-bit lane table (splitter mapping)
    Bits(Vec<u8>),
    Value(Value),
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Int(i) => write!(f, "{}", i),
            AttrValue::Bool(b) => write!(f, "{}", b),
            AttrValue::Text(s) => write!(f, "{:?}", s),
            AttrValue::Bits(bits) => write!(f, "{:?}", bits),
            AttrValue::Value(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<i32> for AttrValue {
    fn from(v: i32) -> Self {
        AttrValue::Int(v as i64)
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Text(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Text(v)
    }
}

impl From<Vec<u8>> for AttrValue {
    fn from(v: Vec<u8>) -> Self {
        AttrValue::Bits(v)
    }
}

impl From<Value> for AttrValue {
    fn from(v: Value) -> Self {
        AttrValue::Value(v)
    }
}

/// Named attributes of a component or circuit, kept in key order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttributeSet {
    values: BTreeMap<String, AttrValue>,
}

impl AttributeSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<AttrValue>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    /// Look up a raw attribute.
    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.values.get(key)
    }

    /// Set an attribute, returning the previous value.
    pub fn set(&mut self, key: &str, value: AttrValue) -> Option<AttrValue> {
        self.values.insert(key.to_string(), value)
    }

    /// Remove an attribute, returning the previous value.
    pub fn remove(&mut self, key: &str) -> Option<AttrValue> {
        self.values.remove(key)
    }

    /// Iterate in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Check if no attribute is set.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Integer attribute, or `default` when absent.
    pub fn int(&self, owner: &str, key: &str, default: i64) -> Result<i64> {
        match self.values.get(key) {
            None => Ok(default),
            Some(AttrValue::Int(i)) => Ok(*i),
            Some(other) => Err(mistyped(owner, key, "an integer", other)),
        }
    }

    /// Integer attribute restricted to `min..=max`.
    pub fn int_in(&self, owner: &str, key: &str, default: i64, min: i64, max: i64) -> Result<i64> {
        let v = self.int(owner, key, default)?;
        if v < min || v > max {
            return Err(SimError::invalid_attribute(
                owner,
                key,
                format!("{} is outside {}..={}", v, min, max),
            ));
        }
        Ok(v)
    }

    /// Boolean attribute, or `default` when absent.
    pub fn bool(&self, owner: &str, key: &str, default: bool) -> Result<bool> {
        match self.values.get(key) {
            None => Ok(default),
            Some(AttrValue::Bool(b)) => Ok(*b),
            Some(other) => Err(mistyped(owner, key, "a boolean", other)),
        }
    }

    /// Text attribute, or `default` when absent.
    pub fn text(&self, owner: &str, key: &str, default: &str) -> Result<String> {
        match self.values.get(key) {
            None => Ok(default.to_string()),
            Some(AttrValue::Text(s)) => Ok(s.clone()),
            Some(other) => Err(mistyped(owner, key, "text", other)),
        }
    }

    /// Lane table attribute, if present.
    pub fn bits(&self, owner: &str, key: &str) -> Result<Option<Vec<u8>>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(AttrValue::Bits(b)) => Ok(Some(b.clone())),
            Some(other) => Err(mistyped(owner, key, "a lane table", other)),
        }
    }

    /// Bus width attribute checked against the configured ceiling.
    pub fn width(&self, owner: &str, key: &str, default: u32, max: u32) -> Result<BitWidth> {
        let raw = self.int(owner, key, default as i64)?;
        let raw = u32::try_from(raw).map_err(|_| {
            SimError::invalid_attribute(owner, key, format!("{} is not a valid width", raw))
        })?;
        BitWidth::with_limit(raw, max)
            .map_err(|e| SimError::invalid_attribute(owner, key, e.to_string()))
    }

    /// Propagation delay attribute (non-negative).
    pub fn delay(&self, owner: &str) -> Result<u32> {
        Ok(self.int_in(owner, "delay", 0, 0, u32::MAX as i64)? as u32)
    }
}

fn mistyped(owner: &str, key: &str, expected: &str, found: &AttrValue) -> SimError {
    SimError::invalid_attribute(owner, key, format!("expected {}, found {}", expected, found))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_access() {
        let attrs = AttributeSet::new()
            .with("width", 8)
            .with("label", "bus")
            .with("output", true);
        assert_eq!(attrs.width("Pin", "width", 1, 32).unwrap().bits(), 8);
        assert_eq!(attrs.text("Pin", "label", "").unwrap(), "bus");
        assert!(attrs.bool("Pin", "output", false).unwrap());
        assert_eq!(attrs.int("Pin", "missing", 7).unwrap(), 7);
        assert!(attrs.bool("Pin", "width", false).is_err());
    }

    #[test]
    fn test_width_ceiling() {
        let attrs = AttributeSet::new().with("width", 40);
        assert!(attrs.width("Pin", "width", 1, 32).is_err());
        assert!(attrs.width("Pin", "width", 1, 64).is_ok());
        let attrs = AttributeSet::new().with("width", -3);
        assert!(attrs.width("Pin", "width", 1, 32).is_err());
    }
}
