//! Placed component instances.

use crate::components::ComponentKind;

use super::attrs::AttributeSet;
use super::types::{ComponentId, EndData, Location};

/// A component placed in a circuit: identity, anchor, attributes, behaviour,
/// and the connection points derived from them.
#[derive(Debug, Clone)]
pub struct Component {
    id: ComponentId,
    location: Location,
    factory: String,
    attrs: AttributeSet,
    kind: ComponentKind,
    ends: Vec<EndData>,
}

impl Component {
    /// Place a component. Ends are computed from the kind and anchor.
    pub fn new(
        id: ComponentId,
        location: Location,
        factory: impl Into<String>,
        attrs: AttributeSet,
        kind: ComponentKind,
    ) -> Self {
        let ends = kind.ends(location);
        Self {
            id,
            location,
            factory: factory.into(),
            attrs,
            kind,
            ends,
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn location(&self) -> Location {
        self.location
    }

    /// Factory name this component was built by.
    pub fn factory(&self) -> &str {
        &self.factory
    }

    pub fn attrs(&self) -> &AttributeSet {
        &self.attrs
    }

    pub fn kind(&self) -> &ComponentKind {
        &self.kind
    }

    pub fn ends(&self) -> &[EndData] {
        &self.ends
    }

    pub fn end(&self, port: usize) -> Option<&EndData> {
        self.ends.get(port)
    }

    /// Check if any end sits at `loc`.
    pub fn has_end_at(&self, loc: Location) -> bool {
        self.ends.iter().any(|e| e.location == loc)
    }

    /// Same component with new attributes and behaviour.
    pub(crate) fn rebuilt(&self, attrs: AttributeSet, kind: ComponentKind) -> Self {
        Self::new(self.id, self.location, self.factory.clone(), attrs, kind)
    }

    /// Check if two components look the same to the simulator: same anchor,
    /// factory, attributes and ends.
    pub fn same_shape(&self, other: &Component) -> bool {
        self.location == other.location
            && self.factory == other.factory
            && self.attrs == other.attrs
            && self.ends == other.ends
    }
}
