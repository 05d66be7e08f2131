//! # GC-Managed Hash
//!
//! A keyed cache of GC resources swept as one unit. Removal leaves a
//! tombstone (`None`) in place instead of shrinking the map, so keys stay
//! stable during a sweep and removal never rehashes. The map is rebuilt
//! wholesale only when tombstones accumulate past a threshold.
//!
//! ## Rebuild Rule
//!
//! The decision uses the tombstone count present when a sweep *starts*.
//! Entries collected during the sweep are tombstoned in place; if the
//! starting count reached the threshold, one rebuild at the end of the sweep
//! drops every tombstone, old and new. With a threshold of 10 000, a sweep
//! starting at 9 999 tombstones never rebuilds, however many entries it
//! collects; the next sweep then starts at or above the threshold and
//! rebuilds exactly once.

use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

use super::resource::touch_resource;
use super::{GcResource, GcResourceKind, GcSystem};
use crate::foundation::time::TimeMs;

/// Inputs for one sweep pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepParams {
    /// Current time
    pub now: TimeMs,
    /// Current renderer tick
    pub tick: u64,
    /// Idle time after which an item is collected
    pub max_unused_time: TimeMs,
    /// Tombstone count at which the map is rebuilt
    pub rebuild_threshold: usize,
}

/// Outcome of sweeping one managed hash
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashSweepReport {
    /// Live entries examined
    pub visited: usize,
    /// Entries unloaded and tombstoned
    pub unloaded: usize,
    /// Unload hooks that returned an error
    pub failures: usize,
    /// Whether the map was rebuilt
    pub rebuilt: bool,
}

/// Sweep target registered with [`GcSystem::add_resource_hash`]
pub trait ManagedHashSweep {
    /// Collect idle entries
    fn sweep(&mut self, params: &SweepParams) -> HashSweepReport;

    /// Name used in diagnostics
    fn label(&self) -> &str;
}

/// Keyed cache of GC resources with tombstoned removal
#[derive(Debug)]
pub struct GcManagedHash<K, R> {
    label: &'static str,
    kind: GcResourceKind,
    items: HashMap<K, Option<R>>,
    tombstones: usize,
    rebuilds: u64,
}

impl<K, R> GcManagedHash<K, R>
where
    K: Eq + Hash,
    R: GcResource,
{
    /// Create an empty hash whose items use the `kind` usage model
    pub fn new(label: &'static str, kind: GcResourceKind) -> Self {
        Self {
            label,
            kind,
            items: HashMap::new(),
            tombstones: 0,
            rebuilds: 0,
        }
    }

    /// Wrap the hash for shared ownership and register it for sweeping
    pub fn register(self, gc: &mut GcSystem, priority: i32) -> Rc<RefCell<Self>>
    where
        K: 'static,
        R: 'static,
    {
        let hash = Rc::new(RefCell::new(self));
        gc.add_resource_hash(&hash, priority);
        hash
    }

    /// Insert `item`, touching it at `now`; returns a displaced live item
    pub fn insert(&mut self, key: K, mut item: R, now: TimeMs) -> Option<R> {
        item.gc_data_mut().set_kind(self.kind);
        touch_resource(&mut item, now);
        match self.items.insert(key, Some(item)) {
            Some(Some(previous)) => Some(previous),
            Some(None) => {
                self.tombstones -= 1;
                None
            }
            None => None,
        }
    }

    /// Live item for `key`
    pub fn get(&self, key: &K) -> Option<&R> {
        self.items.get(key).and_then(Option::as_ref)
    }

    /// Mutable live item for `key`
    pub fn get_mut(&mut self, key: &K) -> Option<&mut R> {
        self.items.get_mut(key).and_then(Option::as_mut)
    }

    /// Whether a live item exists for `key`
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Record a use of `key`'s item; returns whether it was live
    pub fn touch(&mut self, key: &K, now: TimeMs) -> bool {
        match self.get_mut(key) {
            Some(item) => {
                touch_resource(item, now);
                true
            }
            None => false,
        }
    }

    /// Take the live item out, leaving a tombstone
    pub fn remove(&mut self, key: &K) -> Option<R> {
        let item = self.items.get_mut(key).and_then(Option::take);
        if item.is_some() {
            self.tombstones += 1;
        }
        item
    }

    /// Remove and unload the live item; returns whether one existed
    pub fn destroy(&mut self, key: &K) -> bool {
        match self.remove(key) {
            Some(mut item) => {
                if let Err(e) = item.unload() {
                    log::error!("{}: {}", self.label, e);
                }
                item.gc_data_mut().clear();
                true
            }
            None => false,
        }
    }

    /// Live entries
    pub fn iter(&self) -> impl Iterator<Item = (&K, &R)> {
        self.items
            .iter()
            .filter_map(|(key, item)| item.as_ref().map(|item| (key, item)))
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.items.len() - self.tombstones
    }

    /// Whether there are no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tombstoned entries
    pub const fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Live entries plus tombstones
    pub fn raw_len(&self) -> usize {
        self.items.len()
    }

    /// Number of times the map has been rebuilt
    pub const fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// Drop every tombstone by rebuilding the map
    pub fn compact(&mut self) {
        let items = std::mem::take(&mut self.items);
        self.items = items.into_iter().filter(|(_, item)| item.is_some()).collect();
        self.tombstones = 0;
        self.rebuilds += 1;
        log::debug!("{}: rebuilt with {} live entries", self.label, self.items.len());
    }
}

impl<K, R> ManagedHashSweep for GcManagedHash<K, R>
where
    K: Eq + Hash,
    R: GcResource,
{
    fn sweep(&mut self, params: &SweepParams) -> HashSweepReport {
        let tombstones_at_start = self.tombstones;
        let mut report = HashSweepReport::default();

        for slot in self.items.values_mut() {
            let Some(item) = slot.as_mut() else {
                continue;
            };
            report.visited += 1;

            if item.gc_data().last_used().is_none() {
                touch_resource(item, params.now);
                continue;
            }
            if self.kind == GcResourceKind::Renderable && item.last_traversed_tick() == Some(params.tick) {
                touch_resource(item, params.now);
            }
            if !item.auto_garbage_collect() || item.gc_data().idle_time(params.now) <= params.max_unused_time {
                continue;
            }

            if let Err(e) = item.unload() {
                log::error!("{}: {}", self.label, e);
                report.failures += 1;
            }
            item.gc_data_mut().clear();
            *slot = None;
            self.tombstones += 1;
            report.unloaded += 1;
        }

        if tombstones_at_start >= params.rebuild_threshold {
            self.compact();
            report.rebuilt = true;
        }
        report
    }

    fn label(&self) -> &str {
        self.label
    }
}
