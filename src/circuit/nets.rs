//! Net resolution.
//!
//! Wires that share endpoints form a net. Every net that carries a known,
//! consistent width is split into one lane per bit, and splitters tie lanes
//! of different nets together into threads. A thread's value is the
//! combination of every driver on every lane it passes through.
//!
//! A net whose points disagree on width is invalid and reads as an error.

use std::collections::{BTreeMap, BTreeSet};

use super::component::Component;
use super::points::PointIndex;
use super::types::{ComponentId, Location, WidthIncompatibility, Wire};
use crate::value::{BitWidth, Value};

/// Disjoint-set forest over dense indices. Roots are the smallest member.
#[derive(Debug, Default)]
struct Dsu {
    parent: Vec<usize>,
}

impl Dsu {
    fn make(&mut self) -> usize {
        self.parent.push(self.parent.len());
        self.parent.len() - 1
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[hi] = lo;
        }
    }
}

/// A set of points joined by wires (or a lone splitter end).
#[derive(Debug, Clone)]
pub struct Net {
    points: BTreeSet<Location>,
    width: BitWidth,
    determinant: Option<Location>,
    incompatibility: Option<WidthIncompatibility>,
    threads: Vec<usize>,
}

impl Net {
    fn new() -> Self {
        Self {
            points: BTreeSet::new(),
            width: BitWidth::UNKNOWN,
            determinant: None,
            incompatibility: None,
            threads: Vec::new(),
        }
    }

    fn set_width(&mut self, width: BitWidth, at: Location) {
        match self.determinant {
            None => {
                self.width = width;
                self.determinant = Some(at);
            }
            Some(det) if self.width != width => {
                let known = self.width;
                self.incompatibility
                    .get_or_insert_with(|| WidthIncompatibility::new((det, known), (at, width)))
                    .add(at, width);
            }
            Some(_) => {}
        }
    }

    pub fn points(&self) -> &BTreeSet<Location> {
        &self.points
    }

    /// Agreed width; unknown if nothing on the net declares one.
    pub fn width(&self) -> BitWidth {
        self.width
    }

    /// Point that fixed the width.
    pub fn width_determinant(&self) -> Option<Location> {
        self.determinant
    }

    /// Check if all points agree on the width.
    pub fn is_valid(&self) -> bool {
        self.incompatibility.is_none()
    }

    pub fn incompatibility(&self) -> Option<&WidthIncompatibility> {
        self.incompatibility.as_ref()
    }

    /// Thread carrying bit `bit` of this net.
    pub fn thread_of(&self, bit: u32) -> Option<usize> {
        self.threads.get(bit as usize).copied()
    }
}

/// A single logical bit threaded through one or more nets.
#[derive(Debug, Clone, Default)]
pub struct Thread {
    lanes: Vec<(usize, u32)>,
}

impl Thread {
    /// `(net index, bit)` pairs the thread passes through.
    pub fn lanes(&self) -> &[(usize, u32)] {
        &self.lanes
    }
}

/// Cached thread values of one circuit state, tied to the net map generation
/// they were computed for.
#[derive(Debug, Clone, Default)]
pub struct ThreadValues {
    generation: Option<u64>,
    values: Vec<Value>,
}

impl ThreadValues {
    /// Drop the cache so the next propagation recomputes everything.
    pub fn invalidate(&mut self) {
        self.generation = None;
        self.values.clear();
    }

    pub fn get(&self, thread: usize) -> Option<Value> {
        self.values.get(thread).copied()
    }
}

/// The nets and threads of one committed circuit structure.
#[derive(Debug, Clone, Default)]
pub struct NetMap {
    generation: u64,
    point_net: BTreeMap<Location, usize>,
    nets: Vec<Net>,
    threads: Vec<Thread>,
}

impl NetMap {
    /// Resolve nets and threads for a component/wire set.
    pub fn compute(
        components: &BTreeMap<ComponentId, Component>,
        wires: &BTreeSet<Wire>,
        points: &PointIndex,
        generation: u64,
    ) -> Self {
        let mut slots: BTreeMap<Location, usize> = BTreeMap::new();
        let mut dsu = Dsu::default();
        let mut slot = |loc: Location, dsu: &mut Dsu| *slots.entry(loc).or_insert_with(|| dsu.make());

        for wire in wires {
            let a = slot(wire.end0(), &mut dsu);
            let b = slot(wire.end1(), &mut dsu);
            dsu.union(a, b);
        }
        for comp in components.values() {
            if comp.kind().as_splitter().is_some() {
                for end in comp.ends() {
                    slot(end.location, &mut dsu);
                }
            }
        }

        // nets are numbered in order of their smallest point
        let mut map = NetMap {
            generation,
            ..Default::default()
        };
        let mut root_net: BTreeMap<usize, usize> = BTreeMap::new();
        for (&loc, &s) in &slots {
            let root = dsu.find(s);
            let net = *root_net.entry(root).or_insert_with(|| {
                map.nets.push(Net::new());
                map.nets.len() - 1
            });
            map.nets[net].points.insert(loc);
            map.point_net.insert(loc, net);
        }

        for net in &mut map.nets {
            let pts: Vec<Location> = net.points.iter().copied().collect();
            for p in pts {
                let w = points.width_at(p);
                if !w.is_unknown() {
                    net.set_width(w, p);
                }
            }
        }

        // one provisional thread per lane of every usable net
        let mut lanes = Dsu::default();
        for net in &mut map.nets {
            if net.is_valid() && !net.width.is_unknown() {
                net.threads = (0..net.width.bits()).map(|_| lanes.make()).collect();
            }
        }

        for comp in components.values() {
            let Some(splitter) = comp.kind().as_splitter() else {
                continue;
            };
            let ends = comp.ends();
            let Some(&from) = ends.first().and_then(|e| map.point_net.get(&e.location)) else {
                continue;
            };
            for bit in 0..splitter.width().bits() {
                let Some(end) = splitter.end_of(bit) else {
                    continue;
                };
                let Some(&to) = ends.get(end).and_then(|e| map.point_net.get(&e.location)) else {
                    continue;
                };
                let lane = splitter.lane_of(bit);
                let a = map.nets[from].threads.get(bit as usize).copied();
                let b = map.nets[to].threads.get(lane as usize).copied();
                if let (Some(a), Some(b)) = (a, b) {
                    lanes.union(a, b);
                }
            }
        }

        // renumber threads densely in first-seen order
        let mut thread_id: BTreeMap<usize, usize> = BTreeMap::new();
        for (n, net) in map.nets.iter_mut().enumerate() {
            for (bit, provisional) in net.threads.iter_mut().enumerate() {
                let root = lanes.find(*provisional);
                let id = *thread_id.entry(root).or_insert_with(|| {
                    map.threads.push(Thread::default());
                    map.threads.len() - 1
                });
                map.threads[id].lanes.push((n, bit as u32));
                *provisional = id;
            }
        }
        map
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn nets(&self) -> &[Net] {
        &self.nets
    }

    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// Index of the net containing `loc`.
    pub fn net_index(&self, loc: Location) -> Option<usize> {
        self.point_net.get(&loc).copied()
    }

    /// Net containing `loc`, if the point is wired.
    pub fn net_at(&self, loc: Location) -> Option<&Net> {
        self.net_index(loc).map(|n| &self.nets[n])
    }

    /// Check if the point belongs to a net.
    pub fn is_wired(&self, loc: Location) -> bool {
        self.point_net.contains_key(&loc)
    }

    /// Width conflicts on nets.
    pub fn incompatibilities(&self) -> impl Iterator<Item = &WidthIncompatibility> {
        self.nets.iter().filter_map(Net::incompatibility)
    }

    /// Check if every net is valid.
    pub fn is_valid(&self) -> bool {
        self.nets.iter().all(Net::is_valid)
    }

    /// Recompute the values of dirty points.
    ///
    /// `cause` returns the combined value components drive at a point (NIL
    /// for none). The result lists every point whose value must be set; an
    /// unwired point simply takes its cause. A cache from another generation
    /// triggers a full recomputation.
    pub fn propagate<F>(
        &self,
        points: &PointIndex,
        cache: &mut ThreadValues,
        dirty: &BTreeSet<Location>,
        cause: F,
    ) -> Vec<(Location, Value)>
    where
        F: Fn(Location) -> Value,
    {
        let mut out = Vec::new();
        let mut dirty_threads = BTreeSet::new();
        let mut dead_nets = BTreeSet::new();

        let full = cache.generation != Some(self.generation) || cache.values.len() != self.threads.len();
        if full {
            cache.generation = Some(self.generation);
            cache.values = vec![Value::UNKNOWN; self.threads.len()];
            dirty_threads.extend(0..self.threads.len());
            dead_nets.extend((0..self.nets.len()).filter(|&n| self.nets[n].threads.is_empty()));
        }

        for &p in dirty {
            match self.point_net.get(&p) {
                None => out.push((p, cause(p))),
                Some(&n) if self.nets[n].threads.is_empty() => {
                    dead_nets.insert(n);
                }
                Some(&n) => dirty_threads.extend(self.nets[n].threads.iter().copied()),
            }
        }

        for n in dead_nets {
            let net = &self.nets[n];
            for &q in &net.points {
                let value = if net.is_valid() {
                    // wires only, nothing declares a width
                    Value::NIL
                } else {
                    let w = points.width_at(q);
                    if w.is_unknown() {
                        Value::ERROR
                    } else {
                        Value::error(w)
                    }
                };
                out.push((q, value));
            }
        }

        let mut touched = BTreeSet::new();
        for &t in &dirty_threads {
            let mut value = Value::UNKNOWN;
            for &(n, bit) in &self.threads[t].lanes {
                touched.insert(n);
                for &q in &self.nets[n].points {
                    let driven = cause(q);
                    if !driven.is_nil() {
                        value = value.combine(driven.get(bit));
                    }
                }
            }
            cache.values[t] = value;
        }

        for n in touched {
            let net = &self.nets[n];
            let bits: Vec<Value> = net.threads.iter().map(|&t| cache.values[t]).collect();
            let value = Value::from_bits(&bits);
            for &q in &net.points {
                out.push((q, value));
            }
        }
        out
    }
}
