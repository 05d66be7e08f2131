//! # Resource-Level Garbage Collection
//!
//! Tracks GPU-backed resources and unloads the ones that have been idle for
//! longer than `max_unused_time_ms`.
//!
//! ## Resource States
//!
//! ```text
//! untracked ──add_resource──> tracked(last_used = now)
//!     ^                          │ add_resource / touch
//!     │                          v
//!     ├──remove_resource──── touched ...
//!     │                          │ idle > max_unused_time && auto_garbage_collect
//!     └────── clear ──────── unloaded
//! ```
//!
//! ## Ownership
//!
//! Owners keep their resources in `Rc<RefCell<_>>` and the system stores
//! `Weak` references only. The array slot of each resource is mirrored in
//! its [`GcData`](super::GcData), so [`GcSystem::remove_resource`] is a
//! swap-remove that patches the slot of the element moved into the hole.
//! A resource whose owner dropped the last `Rc` silently leaves tracking at
//! the next sweep.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use super::managed_hash::{HashSweepReport, ManagedHashSweep, SweepParams};
use super::resource::touch_resource;
use super::{GcResource, GcResourceKind, ScheduleHandle, Scheduler};
use crate::config::GcConfig;
use crate::foundation::time::TimeMs;
use crate::GcError;

struct ManagedHashEntry {
    hash: Weak<RefCell<dyn ManagedHashSweep>>,
    priority: i32,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcSweepReport {
    /// Array resources examined
    pub visited: usize,
    /// Array resources unloaded
    pub unloaded: usize,
    /// Unload hooks that returned an error
    pub failures: usize,
    /// Array entries dropped because their owner was gone
    pub orphaned: usize,
    /// Aggregated managed-hash results
    pub hashes: HashSweepReport,
}

/// Lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Completed sweeps
    pub sweeps: u64,
    /// Resources unloaded, including managed-hash entries
    pub unloaded: u64,
    /// Unload hooks that returned an error
    pub failures: u64,
    /// Managed-hash rebuilds
    pub hash_rebuilds: u64,
}

/// Resource-level garbage collector
pub struct GcSystem {
    config: GcConfig,
    managed: Vec<Weak<RefCell<dyn GcResource>>>,
    hashes: Vec<ManagedHashEntry>,
    ready: Rc<Cell<bool>>,
    schedule: Option<ScheduleHandle>,
    stats: GcStats,
}

impl std::fmt::Debug for GcSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcSystem")
            .field("config", &self.config)
            .field("managed", &self.managed.len())
            .field("hashes", &self.hashes.len())
            .field("enabled", &self.is_enabled())
            .field("stats", &self.stats)
            .finish()
    }
}

impl GcSystem {
    /// Create the collector and, if active, arm its repeating sweep
    pub fn new(config: GcConfig, scheduler: &mut dyn Scheduler) -> Self {
        let active = config.active;
        let mut system = Self {
            config,
            managed: Vec::new(),
            hashes: Vec::new(),
            ready: Rc::new(Cell::new(false)),
            schedule: None,
            stats: GcStats::default(),
        };
        if active {
            system.arm(scheduler);
        }
        system
    }

    fn arm(&mut self, scheduler: &mut dyn Scheduler) {
        let ready = Rc::clone(&self.ready);
        self.schedule = Some(scheduler.repeat(
            self.config.frequency_ms,
            Box::new(move || ready.set(true)),
        ));
        log::debug!(
            "GC armed: every {}ms, max unused {}ms",
            self.config.frequency_ms,
            self.config.max_unused_time_ms
        );
    }

    /// Enable or disable scheduled sweeps
    pub fn set_enabled(&mut self, enabled: bool, scheduler: &mut dyn Scheduler) {
        match (enabled, self.schedule.take()) {
            (true, None) => self.arm(scheduler),
            (true, Some(handle)) => self.schedule = Some(handle),
            (false, Some(handle)) => {
                scheduler.cancel(handle);
                self.ready.set(false);
                log::debug!("GC disabled");
            }
            (false, None) => {}
        }
        self.config.active = enabled;
    }

    /// Whether scheduled sweeps are armed
    pub const fn is_enabled(&self) -> bool {
        self.schedule.is_some()
    }

    /// Active configuration
    pub const fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Lifetime counters
    pub const fn stats(&self) -> GcStats {
        self.stats
    }

    /// Number of array-tracked resources, including ones whose owner is gone
    pub fn managed_count(&self) -> usize {
        self.managed.len()
    }

    /// Start tracking `resource`, or touch it if it is already tracked
    ///
    /// Fails without side effects when the resource is borrowed; the caller
    /// may register it again later.
    pub fn add_resource<R>(
        &mut self,
        resource: &Rc<RefCell<R>>,
        kind: GcResourceKind,
        now: TimeMs,
    ) -> Result<(), GcError>
    where
        R: GcResource + 'static,
    {
        let Ok(mut inner) = resource.try_borrow_mut() else {
            return Err(GcError::ResourceBusy {
                resource: std::any::type_name::<R>(),
            });
        };
        if inner.gc_data().is_tracked() {
            touch_resource(&mut *inner, now);
            return Ok(());
        }

        let slot = self.managed.len();
        inner.gc_data_mut().track(slot, kind, now);
        inner.on_touch(now);
        drop(inner);

        let shared: Rc<RefCell<dyn GcResource>> = resource.clone();
        self.managed.push(Rc::downgrade(&shared));
        Ok(())
    }

    /// Record a use of a tracked resource
    pub fn touch(&self, resource: &mut dyn GcResource, now: TimeMs) {
        if resource.gc_data().is_tracked() {
            touch_resource(resource, now);
        }
    }

    /// Stop tracking `resource`; untracked resources are ignored
    ///
    /// O(1) through the recorded slot. A slot left stale by a sweep that
    /// found the resource borrowed falls back to a linear search.
    pub fn remove_resource(&mut self, resource: &mut dyn GcResource) {
        let Some(recorded) = resource.gc_data().slot() else {
            return;
        };
        let target = std::ptr::from_ref(&*resource).cast::<()>();
        let index = if self.managed.get(recorded).is_some_and(|entry| holds(entry, target)) {
            recorded
        } else if let Some(found) = self.managed.iter().position(|entry| holds(entry, target)) {
            log::debug!("GC: slot {} of '{}' was stale, found at {}", recorded, resource.label(), found);
            found
        } else {
            log::warn!("GC: '{}' claims slot {} but is not tracked", resource.label(), recorded);
            resource.gc_data_mut().clear();
            return;
        };

        let last = self.managed.len() - 1;
        if index != last {
            self.managed.swap(index, last);
            if let Some(moved) = self.managed[index].upgrade() {
                match moved.try_borrow_mut() {
                    Ok(mut moved) => moved.gc_data_mut().set_slot(index),
                    Err(_) => log::warn!("GC: could not patch slot {} of a borrowed resource", index),
                }
            }
        }
        self.managed.pop();
        resource.gc_data_mut().clear();
    }

    /// Register a managed hash; lower priorities are swept first
    pub fn add_resource_hash<H>(&mut self, hash: &Rc<RefCell<H>>, priority: i32)
    where
        H: ManagedHashSweep + 'static,
    {
        let shared: Rc<RefCell<dyn ManagedHashSweep>> = hash.clone();
        self.hashes.push(ManagedHashEntry {
            hash: Rc::downgrade(&shared),
            priority,
        });
        self.hashes.sort_by_key(|entry| entry.priority);
    }

    /// Run a sweep if the schedule fired since the last frame
    pub fn post_render(&mut self, now: TimeMs, tick: u64) -> Option<GcSweepReport> {
        if !self.ready.replace(false) || !self.is_enabled() {
            return None;
        }
        Some(self.run(now, tick))
    }

    /// Sweep every managed hash, then the tracked array
    pub fn run(&mut self, now: TimeMs, tick: u64) -> GcSweepReport {
        let mut report = GcSweepReport::default();
        let params = SweepParams {
            now,
            tick,
            max_unused_time: self.config.max_unused_time_ms,
            rebuild_threshold: self.config.hash_rebuild_threshold,
        };

        self.hashes.retain(|entry| entry.hash.strong_count() > 0);
        for entry in &self.hashes {
            let Some(hash) = entry.hash.upgrade() else {
                continue;
            };
            let Ok(mut hash) = hash.try_borrow_mut() else {
                log::warn!("GC: managed hash is borrowed, skipping this sweep");
                continue;
            };
            let swept = hash.sweep(&params);
            report.hashes.visited += swept.visited;
            report.hashes.unloaded += swept.unloaded;
            report.hashes.failures += swept.failures;
            report.hashes.rebuilt |= swept.rebuilt;
            if swept.rebuilt {
                self.stats.hash_rebuilds += 1;
            }
        }

        self.sweep_managed(&params, &mut report);

        self.stats.sweeps += 1;
        self.stats.unloaded += (report.unloaded + report.hashes.unloaded) as u64;
        self.stats.failures += (report.failures + report.hashes.failures) as u64;
        log::debug!(
            "GC sweep at {}ms: {} visited, {} unloaded, {} hash entries unloaded",
            now,
            report.visited,
            report.unloaded,
            report.hashes.unloaded
        );
        report
    }

    fn sweep_managed(&mut self, params: &SweepParams, report: &mut GcSweepReport) {
        let mut write = 0;
        for read in 0..self.managed.len() {
            let Some(shared) = self.managed[read].upgrade() else {
                report.orphaned += 1;
                continue;
            };
            let Ok(mut resource) = shared.try_borrow_mut() else {
                // Kept without unloading; its recorded slot lags until the next sweep
                self.managed.swap(write, read);
                write += 1;
                continue;
            };
            report.visited += 1;

            if resource.gc_data().kind() == GcResourceKind::Renderable
                && resource.last_traversed_tick() == Some(params.tick)
            {
                touch_resource(&mut *resource, params.now);
            }

            let idle = resource.gc_data().idle_time(params.now);
            if !resource.auto_garbage_collect() || idle <= params.max_unused_time {
                resource.gc_data_mut().set_slot(write);
                self.managed.swap(write, read);
                write += 1;
                continue;
            }

            if let Err(e) = resource.unload() {
                log::error!("GC: {}", e);
                report.failures += 1;
            }
            resource.gc_data_mut().clear();
            report.unloaded += 1;
        }
        self.managed.truncate(write);
    }
}

fn holds(entry: &Weak<RefCell<dyn GcResource>>, target: *const ()) -> bool {
    entry
        .upgrade()
        .is_some_and(|shared| shared.as_ptr().cast::<()>().cast_const() == target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::{GcData, GcManagedHash, TickerScheduler};

    #[derive(Debug, Default)]
    struct TestResource {
        gc: GcData,
        unloads: u32,
        touches: u32,
        opt_out: bool,
        fail_unload: bool,
        traversed: Option<u64>,
    }

    impl GcResource for TestResource {
        fn gc_data(&self) -> &GcData {
            &self.gc
        }

        fn gc_data_mut(&mut self) -> &mut GcData {
            &mut self.gc
        }

        fn unload(&mut self) -> Result<(), GcError> {
            self.unloads += 1;
            if self.fail_unload {
                return Err(GcError::UnloadFailed {
                    resource: "test".to_string(),
                    reason: "device refused".to_string(),
                });
            }
            Ok(())
        }

        fn auto_garbage_collect(&self) -> bool {
            !self.opt_out
        }

        fn on_touch(&mut self, _now: TimeMs) {
            self.touches += 1;
        }

        fn last_traversed_tick(&self) -> Option<u64> {
            self.traversed
        }
    }

    fn config() -> GcConfig {
        GcConfig {
            active: true,
            max_unused_time_ms: 1000,
            frequency_ms: 100,
            hash_rebuild_threshold: 10_000,
        }
    }

    fn resource() -> Rc<RefCell<TestResource>> {
        Rc::new(RefCell::new(TestResource::default()))
    }

    #[test]
    fn test_idle_eviction() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = GcSystem::new(config(), &mut scheduler);
        let r = resource();
        gc.add_resource(&r, GcResourceKind::Resource, 0).unwrap();

        let report = gc.run(500, 1);
        assert_eq!(report.unloaded, 0);
        assert_eq!(r.borrow().unloads, 0);
        assert!(r.borrow().gc.is_tracked());

        let report = gc.run(1500, 2);
        assert_eq!(report.unloaded, 1);
        assert_eq!(r.borrow().unloads, 1);
        assert!(!r.borrow().gc.is_tracked());
        assert!(r.borrow().gc.last_used().is_none());

        gc.run(3000, 3);
        assert_eq!(r.borrow().unloads, 1);
        assert_eq!(gc.managed_count(), 0);
    }

    #[test]
    fn test_add_tracked_resource_touches() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = GcSystem::new(config(), &mut scheduler);
        let r = resource();
        gc.add_resource(&r, GcResourceKind::Resource, 0).unwrap();
        gc.add_resource(&r, GcResourceKind::Resource, 900).unwrap();

        assert_eq!(gc.managed_count(), 1);
        assert_eq!(r.borrow().gc.last_used(), Some(900));
        assert_eq!(r.borrow().touches, 2);

        gc.run(1500, 1);
        assert_eq!(r.borrow().unloads, 0);
    }

    #[test]
    fn test_swap_removal() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = GcSystem::new(config(), &mut scheduler);
        let (r1, r2, r3) = (resource(), resource(), resource());
        for r in [&r1, &r2, &r3] {
            gc.add_resource(r, GcResourceKind::Resource, 0).unwrap();
        }
        let r1_slot = r1.borrow().gc.slot();
        assert_eq!(r1_slot, Some(0));

        gc.remove_resource(&mut *r1.borrow_mut());
        assert_eq!(r3.borrow().gc.slot(), r1_slot);
        assert_eq!(r2.borrow().gc.slot(), Some(1));
        assert!(!r1.borrow().gc.is_tracked());

        // Removing again is a no-op
        gc.remove_resource(&mut *r1.borrow_mut());
        assert_eq!(gc.managed_count(), 2);

        let report = gc.run(2000, 1);
        assert_eq!(report.visited, 2);
        assert_eq!(report.unloaded, 2);
        assert_eq!(r1.borrow().unloads, 0);
        assert_eq!(r2.borrow().unloads, 1);
        assert_eq!(r3.borrow().unloads, 1);
    }

    #[test]
    fn test_remove_after_sweep_skipped_borrowed_resource() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = GcSystem::new(config(), &mut scheduler);
        let (idle, busy, fresh) = (resource(), resource(), resource());
        gc.add_resource(&idle, GcResourceKind::Resource, 0).unwrap();
        gc.add_resource(&busy, GcResourceKind::Resource, 1000).unwrap();
        gc.add_resource(&fresh, GcResourceKind::Resource, 1000).unwrap();

        {
            let _held = busy.borrow();
            let report = gc.run(1500, 1);
            assert_eq!(report.unloaded, 1);
            assert_eq!(report.visited, 2);
        }
        assert_eq!(gc.managed_count(), 2);
        assert_eq!(fresh.borrow().gc.slot(), Some(1));

        gc.remove_resource(&mut *busy.borrow_mut());
        assert_eq!(gc.managed_count(), 1);
        assert!(!busy.borrow().gc.is_tracked());
        assert!(fresh.borrow().gc.is_tracked());
        assert_eq!(fresh.borrow().gc.slot(), Some(0));

        gc.remove_resource(&mut *fresh.borrow_mut());
        assert_eq!(gc.managed_count(), 0);
    }

    #[test]
    fn test_add_borrowed_resource_fails_and_retries() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = GcSystem::new(config(), &mut scheduler);
        let r = resource();
        {
            let _held = r.borrow();
            let result = gc.add_resource(&r, GcResourceKind::Resource, 0);
            assert!(matches!(result, Err(GcError::ResourceBusy { .. })));
        }
        assert_eq!(gc.managed_count(), 0);
        assert!(!r.borrow().gc.is_tracked());

        gc.add_resource(&r, GcResourceKind::Resource, 0).unwrap();
        assert_eq!(gc.managed_count(), 1);
        gc.run(2000, 1);
        assert_eq!(r.borrow().unloads, 1);
    }

    #[test]
    fn test_auto_garbage_collect_opt_out() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = GcSystem::new(config(), &mut scheduler);
        let pinned = Rc::new(RefCell::new(TestResource {
            opt_out: true,
            ..TestResource::default()
        }));
        gc.add_resource(&pinned, GcResourceKind::Resource, 0).unwrap();

        gc.run(1_000_000, 1);
        assert_eq!(pinned.borrow().unloads, 0);
        assert!(pinned.borrow().gc.is_tracked());
    }

    #[test]
    fn test_renderable_kind_refreshed_by_traversal() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = GcSystem::new(config(), &mut scheduler);
        let drawn = Rc::new(RefCell::new(TestResource {
            traversed: Some(7),
            ..TestResource::default()
        }));
        let stale = Rc::new(RefCell::new(TestResource {
            traversed: Some(3),
            ..TestResource::default()
        }));
        gc.add_resource(&drawn, GcResourceKind::Renderable, 0).unwrap();
        gc.add_resource(&stale, GcResourceKind::Renderable, 0).unwrap();

        gc.run(5000, 7);
        assert_eq!(drawn.borrow().unloads, 0);
        assert_eq!(drawn.borrow().gc.last_used(), Some(5000));
        assert_eq!(stale.borrow().unloads, 1);
        assert_eq!(drawn.borrow().gc.slot(), Some(0));
    }

    #[test]
    fn test_unload_failure_does_not_abort_sweep() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = GcSystem::new(config(), &mut scheduler);
        let failing = Rc::new(RefCell::new(TestResource {
            fail_unload: true,
            ..TestResource::default()
        }));
        let healthy = resource();
        gc.add_resource(&failing, GcResourceKind::Resource, 0).unwrap();
        gc.add_resource(&healthy, GcResourceKind::Resource, 0).unwrap();

        let report = gc.run(2000, 1);
        assert_eq!(report.failures, 1);
        assert_eq!(report.unloaded, 2);
        assert_eq!(healthy.borrow().unloads, 1);
        assert_eq!(gc.stats().failures, 1);
    }

    #[test]
    fn test_dropped_owner_is_untracked() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = GcSystem::new(config(), &mut scheduler);
        let kept = resource();
        gc.add_resource(&resource(), GcResourceKind::Resource, 0).unwrap();
        gc.add_resource(&kept, GcResourceKind::Resource, 0).unwrap();

        let report = gc.run(10, 1);
        assert_eq!(report.orphaned, 1);
        assert_eq!(gc.managed_count(), 1);
        assert_eq!(kept.borrow().gc.slot(), Some(0));
    }

    #[test]
    fn test_scheduled_sweep_and_disable() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = GcSystem::new(config(), &mut scheduler);
        let r = resource();
        gc.add_resource(&r, GcResourceKind::Resource, 0).unwrap();

        assert!(gc.post_render(2000, 1).is_none());

        scheduler.update(100);
        let report = gc.post_render(2000, 1);
        assert_eq!(report.map(|r| r.unloaded), Some(1));
        assert!(gc.post_render(2000, 2).is_none());

        gc.set_enabled(false, &mut scheduler);
        assert!(!gc.is_enabled());
        assert_eq!(scheduler.task_count(), 0);
        scheduler.update(500);
        assert!(gc.post_render(2500, 3).is_none());

        gc.set_enabled(true, &mut scheduler);
        assert_eq!(scheduler.task_count(), 1);
    }

    #[test]
    fn test_inactive_config_never_schedules() {
        let mut scheduler = TickerScheduler::new();
        let gc = GcSystem::new(GcConfig { active: false, ..config() }, &mut scheduler);
        assert!(!gc.is_enabled());
        assert_eq!(scheduler.task_count(), 0);
    }

    #[test]
    fn test_hashes_swept_with_array() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = GcSystem::new(config(), &mut scheduler);
        let hash = GcManagedHash::new("test-hash", GcResourceKind::Resource).register(&mut gc, 0);
        hash.borrow_mut().insert(1u32, TestResource::default(), 0);

        let report = gc.run(5000, 1);
        assert_eq!(report.hashes.unloaded, 1);
        assert!(hash.borrow().get(&1).is_none());
        assert_eq!(gc.stats().unloaded, 1);
    }
}
