//! # Renderable Garbage Collection
//!
//! Destroys per-drawable pipe data (batchable elements, cached mesh
//! geometry) for drawables that have not been rendered for a while.
//!
//! Pipes register a drawable with [`RenderableGcSystem::add_renderable`] when
//! they first materialise data for it. A sweep refreshes every drawable
//! whose render group was executed on the current tick, and hands the ones
//! idle past `max_unused_time_ms` to the caller's destroy callback, which
//! forwards to the owning pipe's `destroy_renderable`. The group is then
//! marked for a rebuild so the data is re-created if the drawable comes
//! back into view. Drawables already removed from the scene are destroyed
//! on the next sweep regardless of idle time.

use std::cell::Cell;
use std::rc::Rc;

use slotmap::SecondaryMap;

use super::{ScheduleHandle, Scheduler};
use crate::config::RenderableGcConfig;
use crate::foundation::time::TimeMs;
use crate::scene::{RenderableId, Scene};

#[derive(Debug, Clone, Copy)]
struct ManagedRenderable {
    id: RenderableId,
    pipe: &'static str,
    last_used: TimeMs,
}

/// Lifetime counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderableGcStats {
    /// Completed sweeps
    pub sweeps: u64,
    /// Drawables whose pipe data was destroyed
    pub collected: u64,
}

/// Collector for per-drawable pipe data
#[derive(Debug)]
pub struct RenderableGcSystem {
    config: RenderableGcConfig,
    managed: Vec<ManagedRenderable>,
    slots: SecondaryMap<RenderableId, usize>,
    ready: Rc<Cell<bool>>,
    schedule: Option<ScheduleHandle>,
    stats: RenderableGcStats,
}

impl RenderableGcSystem {
    /// Create the collector and, if active, arm its repeating sweep
    pub fn new(config: RenderableGcConfig, scheduler: &mut dyn Scheduler) -> Self {
        let active = config.active;
        let mut system = Self {
            config,
            managed: Vec::new(),
            slots: SecondaryMap::new(),
            ready: Rc::new(Cell::new(false)),
            schedule: None,
            stats: RenderableGcStats::default(),
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
    }

    /// Enable or disable scheduled sweeps
    pub fn set_enabled(&mut self, enabled: bool, scheduler: &mut dyn Scheduler) {
        match (enabled, self.schedule.take()) {
            (true, None) => self.arm(scheduler),
            (true, Some(handle)) => self.schedule = Some(handle),
            (false, Some(handle)) => {
                scheduler.cancel(handle);
                self.ready.set(false);
            }
            (false, None) => {}
        }
        self.config.active = enabled;
    }

    /// Whether scheduled sweeps are armed
    pub const fn is_enabled(&self) -> bool {
        self.schedule.is_some()
    }

    /// Lifetime counters
    pub const fn stats(&self) -> RenderableGcStats {
        self.stats
    }

    /// Number of tracked drawables
    pub fn managed_count(&self) -> usize {
        self.managed.len()
    }

    /// Whether `id` is tracked
    pub fn is_managed(&self, id: RenderableId) -> bool {
        self.slots.contains_key(id)
    }

    /// Track `id` as owned by `pipe`, or refresh it if already tracked
    pub fn add_renderable(&mut self, id: RenderableId, pipe: &'static str, now: TimeMs) {
        if let Some(&slot) = self.slots.get(id) {
            let entry = &mut self.managed[slot];
            entry.pipe = pipe;
            entry.last_used = now;
            return;
        }
        self.slots.insert(id, self.managed.len());
        self.managed.push(ManagedRenderable { id, pipe, last_used: now });
    }

    /// Stop tracking `id`; untracked ids are ignored
    pub fn remove_renderable(&mut self, id: RenderableId) {
        let Some(index) = self.slots.remove(id) else {
            return;
        };
        self.managed.swap_remove(index);
        if let Some(moved) = self.managed.get(index) {
            self.slots.insert(moved.id, index);
        }
    }

    /// Run a sweep if the schedule fired since the last frame
    pub fn post_render<F>(&mut self, now: TimeMs, tick: u64, scene: &mut Scene, destroy: F) -> Option<usize>
    where
        F: FnMut(RenderableId, &'static str),
    {
        if !self.ready.replace(false) || !self.is_enabled() {
            return None;
        }
        Some(self.run(now, tick, scene, destroy))
    }

    /// Sweep tracked drawables; returns how many were collected
    ///
    /// `destroy` receives the drawable and the name of the pipe owning its data.
    pub fn run<F>(&mut self, now: TimeMs, tick: u64, scene: &mut Scene, mut destroy: F) -> usize
    where
        F: FnMut(RenderableId, &'static str),
    {
        let Scene { renderables, groups, .. } = scene;
        let mut collected = 0;
        let mut write = 0;

        for read in 0..self.managed.len() {
            let mut entry = self.managed[read];
            let Some(renderable) = renderables.get(entry.id) else {
                destroy(entry.id, entry.pipe);
                self.slots.remove(entry.id);
                collected += 1;
                continue;
            };

            let group = renderable.render_group;
            let traversed = group
                .and_then(|g| groups.get(g))
                .map(|g| g.instruction_set.last_traversed_tick());
            if traversed == Some(tick) {
                entry.last_used = now;
            }

            if now.saturating_sub(entry.last_used) > self.config.max_unused_time_ms {
                destroy(entry.id, entry.pipe);
                if let Some(group) = group.and_then(|g| groups.get_mut(g)) {
                    group.structure_did_change = true;
                }
                self.slots.remove(entry.id);
                collected += 1;
                continue;
            }

            self.managed[write] = entry;
            self.slots.insert(entry.id, write);
            write += 1;
        }
        self.managed.truncate(write);

        self.stats.sweeps += 1;
        self.stats.collected += collected as u64;
        if collected > 0 {
            log::debug!("Renderable GC collected {} drawables", collected);
        }
        collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::TickerScheduler;
    use crate::scene::{Renderable, SceneNode};
    use crate::texture::TextureId;

    fn config() -> RenderableGcConfig {
        RenderableGcConfig {
            active: true,
            max_unused_time_ms: 1000,
            frequency_ms: 100,
        }
    }

    fn scene_with_sprite() -> (Scene, RenderableId) {
        let mut scene = Scene::new();
        let group = scene.create_render_group();
        let id = scene.create_renderable(Renderable::sprite(TextureId(0), 1.0, 1.0));
        scene.add_child(group, SceneNode::Renderable(id));
        (scene, id)
    }

    #[test]
    fn test_idle_renderable_destroyed() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = RenderableGcSystem::new(config(), &mut scheduler);
        let (mut scene, id) = scene_with_sprite();
        let group = scene.render_order()[0];
        scene.render_group_mut(group).unwrap().structure_did_change = false;
        gc.add_renderable(id, "sprite", 0);

        let mut destroyed = Vec::new();
        assert_eq!(gc.run(500, 1, &mut scene, |id, _| destroyed.push(id)), 0);
        assert_eq!(gc.run(1500, 2, &mut scene, |id, _| destroyed.push(id)), 1);
        assert_eq!(destroyed, vec![id]);
        assert!(!gc.is_managed(id));
        assert!(scene.render_group(group).unwrap().structure_did_change());
    }

    #[test]
    fn test_traversed_renderable_refreshed() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = RenderableGcSystem::new(config(), &mut scheduler);
        let (mut scene, id) = scene_with_sprite();
        gc.add_renderable(id, "sprite", 0);

        let group = scene.render_order()[0];
        scene.render_group(group).unwrap().instruction_set().mark_traversed(9);

        assert_eq!(gc.run(5000, 9, &mut scene, |_, _| {}), 0);
        assert_eq!(gc.run(5900, 10, &mut scene, |_, _| {}), 0);
        assert_eq!(gc.run(6100, 11, &mut scene, |_, _| {}), 1);
    }

    #[test]
    fn test_removed_from_scene_destroyed_on_next_sweep() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = RenderableGcSystem::new(config(), &mut scheduler);
        let (mut scene, id) = scene_with_sprite();
        gc.add_renderable(id, "mesh", 0);
        scene.remove_renderable(id);

        let mut destroyed = Vec::new();
        assert_eq!(gc.run(10, 1, &mut scene, |id, pipe| destroyed.push((id, pipe))), 1);
        assert_eq!(destroyed, vec![(id, "mesh")]);
        assert_eq!(gc.managed_count(), 0);
        assert_eq!(gc.run(20, 2, &mut scene, |id, pipe| destroyed.push((id, pipe))), 0);
        assert_eq!(destroyed.len(), 1);
    }

    #[test]
    fn test_swap_remove_keeps_slots_consistent() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = RenderableGcSystem::new(config(), &mut scheduler);
        let mut scene = Scene::new();
        let ids: Vec<_> = (0..3)
            .map(|_| scene.create_renderable(Renderable::sprite(TextureId(0), 1.0, 1.0)))
            .collect();
        for id in &ids {
            gc.add_renderable(*id, "sprite", 0);
        }

        gc.remove_renderable(ids[0]);
        gc.remove_renderable(ids[0]);
        assert_eq!(gc.managed_count(), 2);
        assert!(gc.is_managed(ids[2]));

        gc.remove_renderable(ids[2]);
        gc.remove_renderable(ids[1]);
        assert_eq!(gc.managed_count(), 0);
    }

    #[test]
    fn test_post_render_waits_for_schedule() {
        let mut scheduler = TickerScheduler::new();
        let mut gc = RenderableGcSystem::new(config(), &mut scheduler);
        let (mut scene, id) = scene_with_sprite();
        gc.add_renderable(id, "sprite", 0);

        assert!(gc.post_render(5000, 1, &mut scene, |_, _| {}).is_none());
        scheduler.update(100);
        assert_eq!(gc.post_render(5000, 1, &mut scene, |_, _| {}), Some(1));

        gc.set_enabled(false, &mut scheduler);
        scheduler.update(1000);
        assert!(gc.post_render(9000, 2, &mut scene, |_, _| {}).is_none());
    }
}
