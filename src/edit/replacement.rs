//! Which components replaced which during a transaction.

use std::collections::{BTreeMap, BTreeSet};

use crate::circuit::ComponentId;

/// Bipartite multimap from replaced components to their replacements.
///
/// A removal maps a component to the empty set; an addition maps the empty
/// set to a component (an entry in the inverse with no sources).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplacementMap {
    map: BTreeMap<ComponentId, BTreeSet<ComponentId>>,
    inverse: BTreeMap<ComponentId, BTreeSet<ComponentId>>,
}

impl ReplacementMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map holding the single replacement `old -> new`.
    pub fn single(old: ComponentId, new: ComponentId) -> Self {
        let mut map = Self::new();
        map.put(old, [new]);
        map
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty() && self.inverse.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.inverse.clear();
    }

    /// Record `component` as newly added.
    pub fn add(&mut self, component: ComponentId) {
        self.inverse.insert(component, BTreeSet::new());
    }

    /// Record `component` as removed without replacement.
    pub fn remove(&mut self, component: ComponentId) {
        self.map.insert(component, BTreeSet::new());
    }

    /// Record `old` as replaced by every component in `new`.
    pub fn put(&mut self, old: ComponentId, new: impl IntoIterator<Item = ComponentId>) {
        let targets = self.map.entry(old).or_default();
        for n in new {
            targets.insert(n);
            self.inverse.entry(n).or_default().insert(old);
        }
    }

    /// Compose with a map describing changes made after this one, so that
    /// the result maps original components straight to their final
    /// replacements.
    pub fn append(&mut self, next: &ReplacementMap) {
        for (b, cs) in &next.map {
            // a component nobody replaced replaces itself
            let sources = self
                .inverse
                .remove(b)
                .unwrap_or_else(|| BTreeSet::from([*b]));
            for a in &sources {
                let targets = self.map.entry(*a).or_default();
                targets.remove(b);
                targets.extend(cs.iter().copied());
            }
            for c in cs {
                self.inverse.entry(*c).or_default().extend(sources.iter().copied());
            }
        }
        for c in next.inverse.keys() {
            self.inverse.entry(*c).or_default();
        }
    }

    /// The map read backwards: replacements become the replaced.
    pub fn inverse_map(&self) -> ReplacementMap {
        ReplacementMap {
            map: self.inverse.clone(),
            inverse: self.map.clone(),
        }
    }

    /// Every replaced or removed component with its replacements.
    pub fn replacements(&self) -> impl Iterator<Item = (&ComponentId, &BTreeSet<ComponentId>)> {
        self.map.iter()
    }

    /// Replacements of one component (empty set for a plain removal).
    pub fn replacing(&self, old: ComponentId) -> Option<&BTreeSet<ComponentId>> {
        self.map.get(&old)
    }

    pub fn removals(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.map.keys().copied()
    }

    pub fn additions(&self) -> impl Iterator<Item = ComponentId> + '_ {
        self.inverse.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ComponentId {
        ComponentId(n)
    }

    #[test]
    fn test_single_replacement() {
        let map = ReplacementMap::single(id(1), id(2));
        assert_eq!(map.replacing(id(1)), Some(&BTreeSet::from([id(2)])));
        assert_eq!(map.additions().collect::<Vec<_>>(), vec![id(2)]);
        assert_eq!(map.removals().collect::<Vec<_>>(), vec![id(1)]);
    }

    #[test]
    fn test_append_chains_replacements() {
        let mut map = ReplacementMap::single(id(1), id(2));
        map.append(&ReplacementMap::single(id(2), id(3)));
        assert_eq!(map.replacing(id(1)), Some(&BTreeSet::from([id(3)])));
        assert!(map.replacing(id(2)).is_none());
        assert_eq!(map.additions().collect::<Vec<_>>(), vec![id(3)]);
    }

    #[test]
    fn test_add_then_remove_cancels() {
        let mut map = ReplacementMap::new();
        let mut add = ReplacementMap::new();
        add.add(id(5));
        map.append(&add);
        let mut remove = ReplacementMap::new();
        remove.remove(id(5));
        map.append(&remove);
        assert!(map.is_empty());
    }

    #[test]
    fn test_remove_of_existing_component() {
        let mut map = ReplacementMap::new();
        let mut remove = ReplacementMap::new();
        remove.remove(id(7));
        map.append(&remove);
        assert_eq!(map.replacing(id(7)), Some(&BTreeSet::new()));
    }

    #[test]
    fn test_inverse_swaps_sides() {
        let mut map = ReplacementMap::new();
        map.put(id(1), [id(2), id(3)]);
        let inv = map.inverse_map();
        assert_eq!(inv.replacing(id(2)), Some(&BTreeSet::from([id(1)])));
        assert_eq!(inv.replacing(id(3)), Some(&BTreeSet::from([id(1)])));
        assert_eq!(inv.inverse_map(), map);
    }
}
