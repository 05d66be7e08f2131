//! # Batch Pipe
//!
//! Core pipe that merges batchable elements into batches and draws them.
//!
//! ## Architecture
//!
//! ```text
//! BatchPipe
//! ├── descriptors: named batchers ("default", ...)
//! └── per InstructionSetId
//!     ├── batchers: one lazily created Batcher per descriptor
//!     └── active batcher
//! ```
//!
//! Switching to an element with a different batcher breaks the active one
//! first, so batch instructions from different batchers never interleave
//! within a run. Any non-batch instruction is preceded by a
//! [`BatchPipe::break_batch`], which is what makes the next batch a
//! `StartBatch` that re-binds geometry and shader.

use std::collections::HashMap;

use super::adaptor::{BatchOutcome, BatcherAdaptor};
use super::{Batch, BatchGeometry, BatchableElement, Batcher, BatcherDescriptor};
use crate::config::RendererConfig;
use crate::device::{BlendMode, GpuDevice, ReleaseQueue, ShaderId};
use crate::foundation::pool::Pools;
use crate::foundation::time::TimeMs;
use crate::gc::GcSystem;
use crate::instructions::{Instruction, InstructionPayload, InstructionSet, InstructionSetId};
use crate::pipes::{ExecuteContext, RenderPipe};
use crate::texture::TextureId;
use crate::{RenderError, RenderResult};

/// Batch pipe statistics
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchStats {
    /// Elements appended during builds
    pub elements_batched: u64,
    /// Elements repacked in place
    pub elements_updated: u64,
    /// Batcher geometry uploads
    pub uploads: u64,
    /// Batches drawn
    pub batches_drawn: u64,
    /// Batches skipped because a texture was unavailable
    pub batches_skipped: u64,
}

#[derive(Debug, Default)]
struct SetBatchers {
    batchers: Vec<Option<Batcher>>,
    active: Option<usize>,
    flushed_blend: Option<BlendMode>,
}

impl SetBatchers {
    fn note_flush(&mut self, index: usize) {
        if let Some(blend) = self.batchers[index].as_mut().and_then(Batcher::take_flushed_blend) {
            self.flushed_blend = Some(blend);
        }
    }

    fn break_active(&mut self, set: &mut InstructionSet) {
        if let Some(active) = self.active {
            if let Some(batcher) = self.batchers[active].as_mut() {
                batcher.break_batch(set);
            }
            self.note_flush(active);
        }
    }
}

/// Core batching pipe
pub struct BatchPipe {
    descriptors: Vec<BatcherDescriptor>,
    sets: HashMap<InstructionSetId, SetBatchers>,
    adaptor: Box<dyn BatcherAdaptor>,
    release: ReleaseQueue,
    round_pixels: bool,
    stats: BatchStats,
}

impl std::fmt::Debug for BatchPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPipe")
            .field("descriptors", &self.descriptors)
            .field("sets", &self.sets.len())
            .field("round_pixels", &self.round_pixels)
            .field("stats", &self.stats)
            .finish()
    }
}

impl BatchPipe {
    /// Pipe name
    pub const NAME: &'static str = "batch";

    /// Create the pipe with the default batcher
    pub fn new(config: &RendererConfig, adaptor: Box<dyn BatcherAdaptor>, release: ReleaseQueue) -> Self {
        Self {
            descriptors: vec![BatcherDescriptor::new(
                crate::scene::Renderable::DEFAULT_BATCHER,
                ShaderId::BATCH,
                &config.batcher,
            )],
            sets: HashMap::new(),
            adaptor,
            release,
            round_pixels: config.round_pixels,
            stats: BatchStats::default(),
        }
    }

    /// Register an additional named batcher
    pub fn register_batcher(&mut self, descriptor: BatcherDescriptor) -> RenderResult<()> {
        if self.descriptors.iter().any(|d| d.name == descriptor.name) {
            log::error!("Batcher '{}' is already registered", descriptor.name);
            return Err(RenderError::BatcherNameCollision(descriptor.name.to_string()));
        }
        if self.descriptors.len() > usize::from(u16::MAX) {
            return Err(RenderError::UnknownBatcher(descriptor.name.to_string()));
        }
        log::debug!("Registered batcher '{}'", descriptor.name);
        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Registered batcher names
    pub fn batcher_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.descriptors.iter().map(|d| d.name)
    }

    /// Statistics
    pub const fn stats(&self) -> BatchStats {
        self.stats
    }

    fn descriptor_index(&self, name: &str) -> RenderResult<usize> {
        self.descriptors
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| RenderError::UnknownBatcher(name.to_string()))
    }

    /// Recycle last build's batches and clear geometry for `set`
    pub fn build_start(&mut self, set: &InstructionSet, pools: &mut Pools) {
        let state = self.sets.entry(set.id()).or_default();
        for batcher in state.batchers.iter_mut().flatten() {
            batcher.reset(pools);
        }
        state.active = None;
        state.flushed_blend = None;
    }

    /// Flush the pending batch of `set`
    pub fn build_end(&mut self, set: &mut InstructionSet) {
        self.break_batch(set);
        if let Some(state) = self.sets.get_mut(&set.id()) {
            state.active = None;
        }
    }

    /// Append `element` to the active batch of `set`
    pub fn add_to_batch(
        &mut self,
        element: &mut BatchableElement,
        set: &mut InstructionSet,
        pools: &mut Pools,
    ) -> RenderResult<()> {
        let index = self.descriptor_index(element.batcher)?;
        let state = self.sets.entry(set.id()).or_default();

        if state.active != Some(index) {
            state.break_active(set);
            state.active = Some(index);
        }
        if state.batchers.len() <= index {
            state.batchers.resize_with(index + 1, || None);
        }

        let descriptor = &self.descriptors[index];
        let release = &self.release;
        let batcher = state.batchers[index].get_or_insert_with(|| {
            let batcher_index = u16::try_from(index).unwrap_or(u16::MAX);
            Batcher::new(batcher_index, descriptor.clone(), release)
        });
        batcher.add(element, set, pools, self.round_pixels);
        state.note_flush(index);
        self.stats.elements_batched += 1;
        Ok(())
    }

    /// Finish the current batch of `set` so a non-batch instruction can follow
    pub fn break_batch(&mut self, set: &mut InstructionSet) {
        if let Some(state) = self.sets.get_mut(&set.id()) {
            state.break_active(set);
        }
    }

    /// Blend mode of the most recent batch flushed into `set`, if not yet taken
    pub fn take_flushed_blend(&mut self, set: InstructionSetId) -> Option<BlendMode> {
        self.sets.get_mut(&set).and_then(|state| state.flushed_blend.take())
    }

    fn batcher_mut(&mut self, element: &BatchableElement) -> Option<&mut Batcher> {
        let location = element.location?;
        self.sets
            .get_mut(&location.set)?
            .batchers
            .get_mut(usize::from(location.batcher))?
            .as_mut()
    }

    /// Repack `element` in place at its batch location
    pub fn update_element(&mut self, element: &BatchableElement) -> bool {
        let round_pixels = self.round_pixels;
        let updated = self
            .batcher_mut(element)
            .is_some_and(|batcher| batcher.rewrite(element, round_pixels));
        if updated {
            self.stats.elements_updated += 1;
        }
        updated
    }

    /// Swap `element`'s texture in place if its batch already has a slot for it
    pub fn check_and_update_texture(&mut self, element: &mut BatchableElement, texture: TextureId) -> bool {
        let Some(location) = element.location else {
            return false;
        };
        let Some(batcher) = self
            .sets
            .get(&location.set)
            .and_then(|state| state.batchers.get(usize::from(location.batcher)))
            .and_then(Option::as_ref)
        else {
            return false;
        };
        batcher.swap_texture(element, texture)
    }

    /// Whether `texture` shares a batch with `element`
    pub fn batch_has_texture(&self, element: &BatchableElement, texture: TextureId) -> bool {
        let Some(location) = element.location else {
            return false;
        };
        self.sets
            .get(&location.set)
            .and_then(|state| state.batchers.get(usize::from(location.batcher)))
            .and_then(Option::as_ref)
            .and_then(|batcher| batcher.batch(location.batch))
            .is_some_and(|batch| batch.textures.contains(texture))
    }

    /// Upload every dirty batcher of `set`; returns how many uploaded
    pub fn upload(&mut self, set: InstructionSetId, device: &mut dyn GpuDevice, gc: &mut GcSystem, now: TimeMs) -> usize {
        let Some(state) = self.sets.get_mut(&set) else {
            return 0;
        };
        let mut uploads = 0;
        for batcher in state.batchers.iter_mut().flatten() {
            if batcher.upload(device, gc, now) {
                uploads += 1;
            }
        }
        self.stats.uploads += uploads as u64;
        uploads
    }

    /// Drop all batching state of `set`
    pub fn destroy_set(&mut self, set: InstructionSetId, gc: &mut GcSystem) {
        if let Some(state) = self.sets.remove(&set) {
            for batcher in state.batchers.iter().flatten() {
                batcher.untrack(gc);
            }
        }
    }

    /// Drop the batching state of every set `is_live` rejects
    ///
    /// Returns the number of sets dropped.
    pub fn retain_sets<F>(&mut self, is_live: F, gc: &mut GcSystem) -> usize
    where
        F: Fn(InstructionSetId) -> bool,
    {
        let before = self.sets.len();
        self.sets.retain(|&set, state| {
            if is_live(set) {
                return true;
            }
            for batcher in state.batchers.iter().flatten() {
                batcher.untrack(gc);
            }
            false
        });
        before - self.sets.len()
    }

    /// Number of sets holding batching state
    pub fn set_count(&self) -> usize {
        self.sets.len()
    }

    /// Batcher of `set` by name
    pub fn batcher(&self, set: InstructionSetId, name: &str) -> Option<&Batcher> {
        let index = self.descriptors.iter().position(|d| d.name == name)?;
        self.sets.get(&set)?.batchers.get(index)?.as_ref()
    }

    /// Geometry of `set`'s batcher `name`
    pub fn geometry(&self, set: InstructionSetId, name: &str) -> Option<&BatchGeometry> {
        self.batcher(set, name).map(Batcher::geometry)
    }

    /// Finished batches of `set`'s batcher `name`
    pub fn batches(&self, set: InstructionSetId, name: &str) -> &[Batch] {
        self.batcher(set, name).map_or(&[], Batcher::batches)
    }
}

impl RenderPipe for BatchPipe {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn execute(&mut self, instruction: &Instruction, ctx: &mut ExecuteContext<'_>) -> RenderResult<()> {
        let InstructionPayload::Batch { batcher, batch } = instruction.payload else {
            return Err(RenderError::Execute {
                pipe: Self::NAME,
                reason: format!("unexpected payload {:?}", instruction.payload),
            });
        };
        let missing = || RenderError::MissingBatch { batcher, batch };

        let state = self.sets.get(&ctx.set_id).ok_or_else(missing)?;
        let owner = state
            .batchers
            .get(usize::from(batcher))
            .and_then(Option::as_ref)
            .ok_or_else(missing)?;
        let current = owner.batch(batch).ok_or_else(missing)?;

        if current.action == super::BatchAction::StartBatch {
            self.adaptor.start(owner.geometry(), owner.descriptor().shader, ctx)?;
        }
        match self.adaptor.execute(current, ctx)? {
            BatchOutcome::Drawn => self.stats.batches_drawn += 1,
            BatchOutcome::Skipped => self.stats.batches_skipped += 1,
        }
        Ok(())
    }
}
