//! Batched textured quads

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::{batchable_needs_rebuild, ExecuteContext, PipeContext, RenderPipe, RenderablePipe};
use crate::batcher::BatchableElement;
use crate::foundation::pool::Pools;
use crate::instructions::{Instruction, InstructionSet};
use crate::scene::{Renderable, RenderableId};
use crate::{RenderError, RenderResult};

/// Draws sprites through the batch pipe
///
/// Keeps one pooled [`BatchableElement`] per sprite across frames, so an
/// unchanged scene never re-creates them and a changed sprite is repacked
/// in place at the location its last build assigned.
#[derive(Debug, Default)]
pub struct SpritePipe {
    elements: HashMap<RenderableId, BatchableElement>,
}

impl SpritePipe {
    /// Pipe name
    pub const NAME: &'static str = "sprite";

    /// Create the pipe
    pub fn new() -> Self {
        Self::default()
    }

    /// Element of `id`, if the sprite has been built
    pub fn element(&self, id: RenderableId) -> Option<&BatchableElement> {
        self.elements.get(&id)
    }

    /// Number of sprites with live elements
    pub fn element_count(&self) -> usize {
        self.elements.len()
    }
}

impl RenderPipe for SpritePipe {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn execute(&mut self, instruction: &Instruction, _ctx: &mut ExecuteContext<'_>) -> RenderResult<()> {
        Err(RenderError::Execute {
            pipe: Self::NAME,
            reason: format!("sprites are drawn by batches, got {:?}", instruction.payload),
        })
    }

    fn as_renderable(&mut self) -> Option<&mut dyn RenderablePipe> {
        Some(self)
    }
}

impl RenderablePipe for SpritePipe {
    fn add_renderable(
        &mut self,
        id: RenderableId,
        renderable: &Renderable,
        set: &mut InstructionSet,
        ctx: &mut PipeContext<'_>,
    ) -> RenderResult<()> {
        ctx.renderable_gc.add_renderable(id, renderable.pipe, ctx.now);
        let element = match self.elements.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(ctx.pools.get()),
        };
        element.sync_from(id, renderable);
        element.location = None;

        if !ctx.textures.is_valid(element.texture) {
            log::debug!("Sprite {:?} skipped: texture {:?} is destroyed", id, element.texture);
            return Ok(());
        }
        ctx.batch.add_to_batch(element, set, ctx.pools)
    }

    fn update_renderable(&mut self, id: RenderableId, renderable: &Renderable, ctx: &mut PipeContext<'_>) {
        let Some(element) = self.elements.get_mut(&id) else {
            return;
        };
        element.sync_from(id, renderable);
        if !ctx.batch.update_element(element) {
            log::warn!("Sprite {:?} could not be updated in place", id);
        }
    }

    fn validate_renderable(&mut self, id: RenderableId, renderable: &Renderable, ctx: &mut PipeContext<'_>) -> bool {
        match self.elements.get_mut(&id) {
            Some(element) => batchable_needs_rebuild(element, renderable, ctx),
            None => true,
        }
    }

    fn destroy_renderable(&mut self, id: RenderableId, pools: &mut Pools) {
        if let Some(element) = self.elements.remove(&id) {
            pools.put(element);
        }
    }
}
