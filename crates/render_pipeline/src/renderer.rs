//! # Frame Driver
//!
//! [`Renderer`] owns the pipes, texture residency, both garbage collectors
//! and the object pools, and turns a [`Scene`] into device commands once per
//! frame.
//!
//! ## Frame Flow
//!
//! ```text
//! render(scene, device)
//! ├── tick += 1, flush deferred releases
//! ├── per render group, in render order
//! │   ├── structure changed or a queued drawable fails validation → rebuild
//! │   ├── queued drawables only                                   → update in place
//! │   ├── upload batch geometry (once per batcher)
//! │   ├── execute instructions
//! │   └── stamp traversal tick
//! └── post-render GC hooks
//! ```

use std::time::Instant;

use crate::batcher::{BatchPipe, BatcherAdaptor, DeviceBatcherAdaptor};
use crate::config::RendererConfig;
use crate::device::{GpuDevice, ReleaseQueue};
use crate::foundation::pool::Pools;
use crate::foundation::time::{Clock, TimeMs};
use crate::gc::{GcSweepReport, GcSystem, RenderableGcSystem, Scheduler};
use crate::instructions::InstructionSet;
use crate::pipes::{
    BlendModePipe, BuildEnv, ColorMaskPipe, ExecuteContext, FilterPipe, MeshPipe, RenderPipe, RenderPipes,
    SpritePipe,
};
use crate::scene::{RenderGroup, RenderGroupId, Renderable, RenderableId, Scene, SceneNode};
use crate::texture::{TextureId, TextureSystem};
use crate::RenderResult;

/// Per-frame statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Renderer tick of this frame
    pub tick: u64,
    /// Groups whose instruction set was rebuilt
    pub groups_rebuilt: usize,
    /// Groups updated in place
    pub groups_updated: usize,
    /// Groups replayed unchanged
    pub groups_replayed: usize,
    /// Groups whose build or execution failed
    pub failed_groups: usize,
    /// Instructions executed
    pub instructions_executed: usize,
    /// Batcher geometry uploads
    pub uploads: usize,
    /// Device handles released at frame start
    pub released: usize,
    /// Time spent building and updating (microseconds)
    pub build_time_us: u64,
    /// Time spent uploading and executing (microseconds)
    pub execute_time_us: u64,
    /// Resource GC sweep, if one ran
    pub gc: Option<GcSweepReport>,
    /// Drawables collected by the renderable GC, if it ran
    pub renderables_collected: Option<usize>,
}

enum GroupPass {
    Rebuilt,
    Updated,
    Replayed,
}

/// Renders scenes through a fixed set of pipes
pub struct Renderer {
    config: RendererConfig,
    pipes: RenderPipes,
    textures: TextureSystem,
    gc: GcSystem,
    renderable_gc: RenderableGcSystem,
    pools: Pools,
    release: ReleaseQueue,
    clock: Box<dyn Clock>,
    tick: u64,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("tick", &self.tick)
            .field("pipes", &self.pipes)
            .field("gc", &self.gc)
            .field("renderable_gc", &self.renderable_gc)
            .finish()
    }
}

impl Renderer {
    /// Create a renderer with `pipes` registered after the core pipes
    ///
    /// Both collectors arm their repeating sweeps on `scheduler`; the host
    /// keeps driving it.
    pub fn new(
        config: RendererConfig,
        pipes: Vec<Box<dyn RenderPipe>>,
        adaptor: Box<dyn BatcherAdaptor>,
        scheduler: &mut dyn Scheduler,
        clock: Box<dyn Clock>,
    ) -> RenderResult<Self> {
        if let Err(e) = config.validate() {
            log::error!("Invalid renderer configuration: {}", e);
            return Err(e.into());
        }

        let release = ReleaseQueue::new();
        let mut gc = GcSystem::new(config.gc.clone(), scheduler);
        let renderable_gc = RenderableGcSystem::new(config.renderable_gc.clone(), scheduler);
        let textures = TextureSystem::new(&mut gc, release.clone());
        let batch = BatchPipe::new(&config, adaptor, release.clone());
        let pipes = RenderPipes::new(batch, BlendModePipe::new(), pipes, &mut gc, &release, &config)?;

        log::info!(
            "Renderer created with {} pipes, {} texture slots per batch",
            pipes.len(),
            config.batcher.max_batchable_textures
        );
        Ok(Self {
            config,
            pipes,
            textures,
            gc,
            renderable_gc,
            pools: Pools::new(),
            release,
            clock,
            tick: 0,
        })
    }

    /// Create a renderer with the sprite, mesh, filter and colour mask pipes
    pub fn with_default_pipes(
        config: RendererConfig,
        scheduler: &mut dyn Scheduler,
        clock: Box<dyn Clock>,
    ) -> RenderResult<Self> {
        let pipes: Vec<Box<dyn RenderPipe>> = vec![
            Box::new(SpritePipe::new()),
            Box::new(MeshPipe::new()),
            Box::new(FilterPipe::new()),
            Box::new(ColorMaskPipe::new()),
        ];
        Self::new(config, pipes, Box::new(DeviceBatcherAdaptor::new()), scheduler, clock)
    }

    /// Active configuration
    pub const fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Ticks rendered so far
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Registered pipes
    pub const fn pipes(&self) -> &RenderPipes {
        &self.pipes
    }

    /// Mutable pipes, e.g. to register batchers
    pub fn pipes_mut(&mut self) -> &mut RenderPipes {
        &mut self.pipes
    }

    /// Texture sources and residency
    pub const fn textures(&self) -> &TextureSystem {
        &self.textures
    }

    /// Mutable texture sources
    pub fn textures_mut(&mut self) -> &mut TextureSystem {
        &mut self.textures
    }

    /// Resource collector
    pub const fn gc(&self) -> &GcSystem {
        &self.gc
    }

    /// Per-drawable cache collector
    pub const fn renderable_gc(&self) -> &RenderableGcSystem {
        &self.renderable_gc
    }

    /// Object pools
    pub const fn pools(&self) -> &Pools {
        &self.pools
    }

    /// Enable or disable both collectors
    pub fn set_gc_enabled(&mut self, enabled: bool, scheduler: &mut dyn Scheduler) {
        self.gc.set_enabled(enabled, scheduler);
        self.renderable_gc.set_enabled(enabled, scheduler);
        self.config.gc.active = enabled;
        self.config.renderable_gc.active = enabled;
    }

    /// Remove a drawable from `scene` and release its pipe data
    pub fn destroy_renderable(&mut self, scene: &mut Scene, id: RenderableId) -> Option<Renderable> {
        let renderable = scene.remove_renderable(id)?;
        self.pipes.destroy_renderable(id, renderable.pipe, &mut self.pools);
        self.renderable_gc.remove_renderable(id);
        Some(renderable)
    }

    /// Remove a render group, its batching state and its drawables' pipe data
    ///
    /// The drawables themselves stay in `scene`, detached.
    pub fn destroy_render_group(&mut self, scene: &mut Scene, group: RenderGroupId) -> bool {
        let Some(removed) = scene.remove_render_group(group) else {
            return false;
        };
        self.pipes.destroy_set(removed.instruction_set().id(), &mut self.gc);
        for node in removed.children() {
            node.for_each_renderable(&mut |id| {
                if let Some(renderable) = scene.renderable(id) {
                    self.pipes.destroy_renderable(id, renderable.pipe, &mut self.pools);
                }
                self.renderable_gc.remove_renderable(id);
            });
        }
        true
    }

    /// Destroy a texture and queue every drawable using it for validation
    pub fn destroy_texture(&mut self, scene: &mut Scene, texture: TextureId) {
        self.textures.destroy(texture);
        let users: Vec<_> = scene
            .renderables
            .iter()
            .filter(|(_, r)| r.texture == texture)
            .map(|(id, _)| id)
            .collect();
        for id in users {
            scene.renderable_mut(id);
        }
    }

    /// Render one frame
    pub fn render(&mut self, scene: &mut Scene, device: &mut dyn GpuDevice) -> FrameStats {
        self.tick += 1;
        let tick = self.tick;
        let now = self.clock.now_ms();

        // Groups removed straight from the scene leave their batching state behind
        let pruned = self.pipes.retain_sets(
            |set| scene.groups.values().any(|g| g.instruction_set().id() == set),
            &mut self.gc,
        );
        if pruned > 0 {
            log::debug!("Dropped batching state of {} removed render groups", pruned);
        }

        let mut stats = FrameStats {
            tick,
            released: self.release.flush(device),
            ..FrameStats::default()
        };

        let Self {
            pipes,
            textures,
            gc,
            renderable_gc,
            pools,
            ..
        } = self;

        let mut index = 0;
        while let Some(&group_id) = scene.render_order().get(index) {
            index += 1;

            let build_start = Instant::now();
            let mut env = BuildEnv {
                pools: &mut *pools,
                textures: &*textures,
                renderable_gc: &mut *renderable_gc,
                now,
            };
            let pass = prepare_group(pipes, &mut env, scene, group_id);
            stats.build_time_us += elapsed_us(build_start);

            match pass {
                Ok(GroupPass::Rebuilt) => stats.groups_rebuilt += 1,
                Ok(GroupPass::Updated) => stats.groups_updated += 1,
                Ok(GroupPass::Replayed) => stats.groups_replayed += 1,
                Err(e) => {
                    log::error!("Failed to build render group {:?}: {}", group_id, e);
                    if let Some(group) = scene.render_group_mut(group_id) {
                        group.mark_structure_changed();
                    }
                    stats.failed_groups += 1;
                    continue;
                }
            }

            let Some(group) = scene.render_group(group_id) else {
                continue;
            };
            let execute_start = Instant::now();
            let set = group.instruction_set();
            stats.uploads += pipes.upload(set.id(), &mut *device, gc, now);
            match execute_set(pipes, set, &mut *device, textures, now) {
                Ok(executed) => stats.instructions_executed += executed,
                Err((executed, e)) => {
                    log::error!("Render group {:?} aborted: {}", group_id, e);
                    stats.instructions_executed += executed;
                    stats.failed_groups += 1;
                }
            }
            set.mark_traversed(tick);
            stats.execute_time_us += elapsed_us(execute_start);
        }

        stats.gc = gc.post_render(now, tick);
        stats.renderables_collected =
            renderable_gc.post_render(now, tick, scene, |id, pipe| {
                pipes.destroy_renderable(id, pipe, pools);
            });
        if let Some(report) = &stats.gc {
            log::debug!(
                "GC tick {}: {} unloaded, {} hash entries unloaded",
                tick,
                report.unloaded,
                report.hashes.unloaded
            );
        }
        log::trace!("Frame {:?}", stats);
        stats
    }
}

fn elapsed_us(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_micros()).unwrap_or(u64::MAX)
}

/// Rebuild, update or replay one group
fn prepare_group(
    pipes: &mut RenderPipes,
    env: &mut BuildEnv<'_>,
    scene: &mut Scene,
    group_id: RenderGroupId,
) -> RenderResult<GroupPass> {
    let Scene { renderables, groups, .. } = scene;
    let Some(group) = groups.get_mut(group_id) else {
        return Ok(GroupPass::Replayed);
    };

    let mut rebuild = group.structure_did_change;
    if !rebuild {
        for &id in &group.to_update {
            let Some(renderable) = renderables.get(id).filter(|r| r.visible) else {
                continue;
            };
            if pipes.validate_renderable(id, renderable, env)? {
                rebuild = true;
                break;
            }
        }
    }

    let pass = if rebuild {
        build_group(pipes, env, renderables, group)?;
        GroupPass::Rebuilt
    } else if group.to_update.is_empty() {
        GroupPass::Replayed
    } else {
        for &id in &group.to_update {
            if let Some(renderable) = renderables.get(id).filter(|r| r.visible) {
                pipes.update_renderable(id, renderable, env)?;
            }
        }
        GroupPass::Updated
    };

    for id in group.to_update.drain(..) {
        if let Some(renderable) = renderables.get_mut(id) {
            renderable.did_view_update = false;
        }
    }
    Ok(pass)
}

fn build_group(
    pipes: &mut RenderPipes,
    env: &mut BuildEnv<'_>,
    renderables: &slotmap::SlotMap<RenderableId, Renderable>,
    group: &mut RenderGroup,
) -> RenderResult<()> {
    let set = &mut group.instruction_set;
    pipes.build_start(set, env);
    let collected = group
        .children
        .iter()
        .try_for_each(|node| collect_node(pipes, env, renderables, node, set));
    pipes.build_end(set, env);
    collected?;

    group.structure_did_change = false;
    group.builds += 1;
    log::debug!(
        "Rebuilt instruction set {:?}: {} instructions (build {})",
        set.id(),
        set.len(),
        group.builds
    );
    Ok(())
}

fn collect_node(
    pipes: &mut RenderPipes,
    env: &mut BuildEnv<'_>,
    renderables: &slotmap::SlotMap<RenderableId, Renderable>,
    node: &SceneNode,
    set: &mut InstructionSet,
) -> RenderResult<()> {
    match node {
        SceneNode::Renderable(id) => match renderables.get(*id) {
            Some(renderable) if renderable.visible => pipes.add_renderable(*id, renderable, set, env),
            _ => Ok(()),
        },
        SceneNode::Effect { effect, children } => {
            pipes.push_effect(effect, set, env)?;
            for child in children {
                collect_node(pipes, env, renderables, child, set)?;
            }
            pipes.pop_effect(effect, set, env)
        }
    }
}

/// Execute a set in order; on failure the rest of the set is skipped
fn execute_set(
    pipes: &mut RenderPipes,
    set: &InstructionSet,
    device: &mut dyn GpuDevice,
    textures: &mut TextureSystem,
    now: TimeMs,
) -> Result<usize, (usize, crate::RenderError)> {
    let tick = set.tick_handle();
    let mut ctx = ExecuteContext {
        device,
        textures,
        set_id: set.id(),
        set_tick: &tick,
        now,
    };
    let mut executed = 0;
    for instruction in set {
        pipes.execute(instruction, &mut ctx).map_err(|e| (executed, e))?;
        executed += 1;
    }
    Ok(executed)
}
