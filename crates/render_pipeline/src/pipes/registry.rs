//! Pipe registry and dispatch

use std::collections::HashMap;

use super::{
    BlendModePipe, ExecuteContext, PipeContext, PipeId, PipeInit, RenderPipe, RenderablePipe,
};
use crate::batcher::BatchPipe;
use crate::config::RendererConfig;
use crate::device::ReleaseQueue;
use crate::foundation::pool::Pools;
use crate::foundation::time::TimeMs;
use crate::gc::{GcSystem, RenderableGcSystem};
use crate::instructions::{Instruction, InstructionSet, InstructionSetId};
use crate::scene::{Effect, Renderable, RenderableId};
use crate::texture::TextureSystem;
use crate::{RenderError, RenderResult};

/// Renderer-owned state lent to pipes for one build or update pass
pub(crate) struct BuildEnv<'a> {
    pub pools: &'a mut Pools,
    pub textures: &'a TextureSystem,
    pub renderable_gc: &'a mut RenderableGcSystem,
    pub now: TimeMs,
}

/// The fixed set of pipes a renderer dispatches to
///
/// Built once from the core pipes plus a list of additional pipes. Names
/// must be unique; ids are assigned in registration order.
pub struct RenderPipes {
    batch: BatchPipe,
    blend_mode: BlendModePipe,
    pipes: Vec<Box<dyn RenderPipe>>,
    ids: HashMap<&'static str, PipeId>,
}

impl std::fmt::Debug for RenderPipes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPipes")
            .field("batch", &self.batch)
            .field("pipes", &self.pipes.iter().map(|p| p.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl RenderPipes {
    /// Register `pipes` after the core pipes and initialise each of them
    pub fn new(
        batch: BatchPipe,
        blend_mode: BlendModePipe,
        mut pipes: Vec<Box<dyn RenderPipe>>,
        gc: &mut GcSystem,
        release: &ReleaseQueue,
        config: &RendererConfig,
    ) -> RenderResult<Self> {
        let mut ids = HashMap::new();
        ids.insert(batch.name(), PipeId::BATCH);
        ids.insert(blend_mode.name(), PipeId::BLEND_MODE);

        for (offset, pipe) in pipes.iter_mut().enumerate() {
            let name = pipe.name();
            let id = u16::try_from(offset)
                .ok()
                .and_then(|offset| PipeId::FIRST_USER.0.checked_add(offset))
                .map(PipeId)
                .ok_or_else(|| RenderError::UnknownPipe(name.to_string()))?;
            if ids.insert(name, id).is_some() {
                log::error!("Render pipe '{}' is registered more than once", name);
                return Err(RenderError::PipeNameCollision(name.to_string()));
            }
            pipe.init(PipeInit {
                id,
                gc: &mut *gc,
                release,
                config,
            })?;
            log::debug!("Registered render pipe '{}' as {:?}", name, id);
        }

        Ok(Self {
            batch,
            blend_mode,
            pipes,
            ids,
        })
    }

    /// Id registered under `name`
    pub fn id_of(&self, name: &str) -> RenderResult<PipeId> {
        self.ids
            .get(name)
            .copied()
            .ok_or_else(|| RenderError::UnknownPipe(name.to_string()))
    }

    /// Number of registered pipes, core pipes included
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Always false; the core pipes are always registered
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Registered names
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ids.keys().copied()
    }

    /// The batch pipe
    pub const fn batch(&self) -> &BatchPipe {
        &self.batch
    }

    /// Mutable batch pipe, e.g. to register batchers
    pub fn batch_mut(&mut self) -> &mut BatchPipe {
        &mut self.batch
    }

    /// The blend mode pipe
    pub const fn blend_mode(&self) -> &BlendModePipe {
        &self.blend_mode
    }

    /// Additional pipe by name
    pub fn get(&self, name: &str) -> Option<&dyn RenderPipe> {
        let index = Self::user_index(*self.ids.get(name)?)?;
        self.pipes.get(index).map(|pipe| &**pipe)
    }

    /// Mutable additional pipe by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn RenderPipe + 'static)> {
        let index = Self::user_index(*self.ids.get(name)?)?;
        self.pipes.get_mut(index).map(|pipe| &mut **pipe)
    }

    fn user_index(id: PipeId) -> Option<usize> {
        id.0.checked_sub(PipeId::FIRST_USER.0).map(usize::from)
    }

    fn split<'a>(
        &'a mut self,
        env: &'a mut BuildEnv<'_>,
    ) -> (PipeContext<'a>, &'a mut [Box<dyn RenderPipe>]) {
        let ctx = PipeContext {
            batch: &mut self.batch,
            blend_mode: &mut self.blend_mode,
            pools: &mut *env.pools,
            textures: env.textures,
            renderable_gc: &mut *env.renderable_gc,
            now: env.now,
        };
        (ctx, &mut self.pipes)
    }

    fn renderable_pipe<'p>(
        pipes: &'p mut [Box<dyn RenderPipe>],
        id: PipeId,
        name: &str,
    ) -> RenderResult<&'p mut dyn RenderablePipe> {
        Self::user_index(id)
            .and_then(|index| pipes.get_mut(index))
            .and_then(|pipe| pipe.as_renderable())
            .ok_or_else(|| RenderError::MissingCapability {
                pipe: name.to_string(),
                capability: "renderables",
            })
    }

    pub(crate) fn build_start(&mut self, set: &mut InstructionSet, env: &mut BuildEnv<'_>) {
        set.reset();
        let (mut ctx, pipes) = self.split(env);
        ctx.batch.build_start(set, ctx.pools);
        ctx.blend_mode.build_start(set);
        for pipe in pipes.iter_mut() {
            if let Some(stateful) = pipe.as_stateful() {
                stateful.build_start(set, &mut ctx);
            }
        }
    }

    pub(crate) fn build_end(&mut self, set: &mut InstructionSet, env: &mut BuildEnv<'_>) {
        let (mut ctx, pipes) = self.split(env);
        ctx.batch.break_batch(set);
        for pipe in pipes.iter_mut() {
            if let Some(stateful) = pipe.as_stateful() {
                stateful.build_end(set, &mut ctx);
            }
        }
        ctx.batch.build_end(set);
    }

    pub(crate) fn add_renderable(
        &mut self,
        id: RenderableId,
        renderable: &Renderable,
        set: &mut InstructionSet,
        env: &mut BuildEnv<'_>,
    ) -> RenderResult<()> {
        let pipe_id = self.id_of(renderable.pipe)?;
        let (mut ctx, pipes) = self.split(env);
        Self::renderable_pipe(pipes, pipe_id, renderable.pipe)?.add_renderable(id, renderable, set, &mut ctx)
    }

    pub(crate) fn update_renderable(
        &mut self,
        id: RenderableId,
        renderable: &Renderable,
        env: &mut BuildEnv<'_>,
    ) -> RenderResult<()> {
        let pipe_id = self.id_of(renderable.pipe)?;
        let (mut ctx, pipes) = self.split(env);
        Self::renderable_pipe(pipes, pipe_id, renderable.pipe)?.update_renderable(id, renderable, &mut ctx);
        Ok(())
    }

    pub(crate) fn validate_renderable(
        &mut self,
        id: RenderableId,
        renderable: &Renderable,
        env: &mut BuildEnv<'_>,
    ) -> RenderResult<bool> {
        let pipe_id = self.id_of(renderable.pipe)?;
        let (mut ctx, pipes) = self.split(env);
        Ok(Self::renderable_pipe(pipes, pipe_id, renderable.pipe)?.validate_renderable(id, renderable, &mut ctx))
    }

    /// Drop the data `pipe` holds for `id`; unknown pipes are ignored
    pub fn destroy_renderable(&mut self, id: RenderableId, pipe: &str, pools: &mut Pools) {
        let Ok(pipe_id) = self.id_of(pipe) else {
            log::debug!("No pipe '{}' to destroy {:?}", pipe, id);
            return;
        };
        match Self::renderable_pipe(&mut self.pipes, pipe_id, pipe) {
            Ok(pipe) => pipe.destroy_renderable(id, pools),
            Err(e) => log::debug!("{}", e),
        }
    }

    fn effect_pipe_call<F>(
        &mut self,
        effect: &Effect,
        set: &mut InstructionSet,
        env: &mut BuildEnv<'_>,
        call: F,
    ) -> RenderResult<()>
    where
        F: FnOnce(&mut dyn super::EffectPipe, &Effect, &mut InstructionSet, &mut PipeContext<'_>) -> RenderResult<()>,
    {
        let name = effect.pipe_name();
        let pipe_id = self.id_of(name)?;
        let (mut ctx, pipes) = self.split(env);
        let pipe = Self::user_index(pipe_id)
            .and_then(|index| pipes.get_mut(index))
            .and_then(|pipe| pipe.as_effect())
            .ok_or_else(|| RenderError::MissingCapability {
                pipe: name.to_string(),
                capability: "effects",
            })?;
        call(pipe, effect, set, &mut ctx)
    }

    pub(crate) fn push_effect(
        &mut self,
        effect: &Effect,
        set: &mut InstructionSet,
        env: &mut BuildEnv<'_>,
    ) -> RenderResult<()> {
        self.effect_pipe_call(effect, set, env, |pipe, effect, set, ctx| pipe.push(effect, set, ctx))
    }

    pub(crate) fn pop_effect(
        &mut self,
        effect: &Effect,
        set: &mut InstructionSet,
        env: &mut BuildEnv<'_>,
    ) -> RenderResult<()> {
        self.effect_pipe_call(effect, set, env, |pipe, effect, set, ctx| pipe.pop(effect, set, ctx))
    }

    /// Execute one instruction on the pipe it names
    pub fn execute(&mut self, instruction: &Instruction, ctx: &mut ExecuteContext<'_>) -> RenderResult<()> {
        match instruction.pipe {
            PipeId::BATCH => self.batch.execute(instruction, ctx),
            PipeId::BLEND_MODE => self.blend_mode.execute(instruction, ctx),
            id => {
                let index = usize::from(id.0 - PipeId::FIRST_USER.0);
                let pipe = self
                    .pipes
                    .get_mut(index)
                    .ok_or_else(|| RenderError::UnknownPipe(format!("{:?}", id)))?;
                log::trace!("{} <- {:?}", pipe.name(), instruction.payload);
                pipe.execute(instruction, ctx)
            }
        }
    }

    /// Upload batch geometry of `set`
    pub(crate) fn upload(
        &mut self,
        set: InstructionSetId,
        device: &mut dyn crate::device::GpuDevice,
        gc: &mut GcSystem,
        now: TimeMs,
    ) -> usize {
        self.batch.upload(set, device, gc, now)
    }

    /// Drop all batching state of a destroyed set
    pub(crate) fn destroy_set(&mut self, set: InstructionSetId, gc: &mut GcSystem) {
        self.batch.destroy_set(set, gc);
    }

    /// Drop batching state of sets whose group no longer exists
    pub(crate) fn retain_sets<F>(&mut self, is_live: F, gc: &mut GcSystem) -> usize
    where
        F: Fn(InstructionSetId) -> bool,
    {
        self.batch.retain_sets(is_live, gc)
    }
}
