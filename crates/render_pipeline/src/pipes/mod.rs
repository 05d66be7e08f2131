//! # Render Pipes
//!
//! A render pipe turns one kind of scene node into instructions at build
//! time and executes those instructions at render time.
//!
//! ## Capabilities
//!
//! ```text
//! RenderPipe (required)      name, init, execute
//! ├── RenderablePipe         add / update / validate / destroy a drawable
//! ├── StatefulPipe           build_start / build_end of every set
//! └── EffectPipe             push / pop around a subtree
//! ```
//!
//! Optional capabilities are discovered through the `as_*` accessors on
//! [`RenderPipe`], so the registry never has to guess what a pipe supports.
//!
//! ## Core Pipes
//!
//! The batch pipe and the blend mode pipe are always present with fixed
//! ids. Every other pipe reaches them through [`PipeContext`] to merge
//! drawables into batches or to change blend state, and must break the
//! active batch before emitting an instruction of its own.

mod blend_mode;
mod color_mask;
mod filter;
mod mesh;
mod registry;
mod sprite;

pub use blend_mode::BlendModePipe;
pub use color_mask::ColorMaskPipe;
pub use filter::FilterPipe;
pub use mesh::{MeshGpuData, MeshPipe, MeshStats};
pub use registry::RenderPipes;
pub use sprite::SpritePipe;

pub(crate) use registry::BuildEnv;

use crate::batcher::{BatchPipe, BatchableElement};
use crate::config::RendererConfig;
use crate::device::{GpuDevice, ReleaseQueue};
use crate::foundation::pool::Pools;
use crate::foundation::time::TimeMs;
use crate::gc::{GcSystem, RenderableGcSystem};
use crate::instructions::{Instruction, InstructionSet, InstructionSetId, TickHandle};
use crate::scene::{Effect, Renderable, RenderableId};
use crate::texture::TextureSystem;
use crate::RenderResult;

/// Index of a registered pipe, stored in every instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipeId(pub(crate) u16);

impl PipeId {
    /// The batch pipe
    pub const BATCH: Self = Self(0);
    /// The blend mode pipe
    pub const BLEND_MODE: Self = Self(1);
    /// First id handed to additional pipes
    pub const FIRST_USER: Self = Self(2);

    /// Raw index
    pub const fn index(self) -> u16 {
        self.0
    }
}

/// Shared state available to pipes while building an instruction set
pub struct PipeContext<'a> {
    /// Core batching pipe
    pub batch: &'a mut BatchPipe,
    /// Core blend state pipe
    pub blend_mode: &'a mut BlendModePipe,
    /// Recycled per-drawable objects
    pub pools: &'a mut Pools,
    /// Texture sources, for validity checks
    pub textures: &'a TextureSystem,
    /// Per-drawable cache collector
    pub renderable_gc: &'a mut RenderableGcSystem,
    /// Frame time
    pub now: TimeMs,
}

/// Shared state available to pipes while executing instructions
pub struct ExecuteContext<'a> {
    /// Target device
    pub device: &'a mut dyn GpuDevice,
    /// Texture residency
    pub textures: &'a mut TextureSystem,
    /// Set being executed
    pub set_id: InstructionSetId,
    /// Traversal tick of the set being executed
    pub set_tick: &'a TickHandle,
    /// Frame time
    pub now: TimeMs,
}

/// One-time setup handed to each pipe on registration
pub struct PipeInit<'a> {
    /// Id assigned to the pipe
    pub id: PipeId,
    /// Resource collector, for registering managed hashes
    pub gc: &'a mut GcSystem,
    /// Deferred release queue for device handles the pipe owns
    pub release: &'a ReleaseQueue,
    /// Renderer configuration
    pub config: &'a RendererConfig,
}

/// A pipe that can execute instructions
pub trait RenderPipe {
    /// Unique registry name
    fn name(&self) -> &'static str;

    /// Called once when the pipe is registered
    fn init(&mut self, _init: PipeInit<'_>) -> RenderResult<()> {
        Ok(())
    }

    /// Execute one instruction addressed to this pipe
    fn execute(&mut self, instruction: &Instruction, ctx: &mut ExecuteContext<'_>) -> RenderResult<()>;

    /// Drawable capability
    fn as_renderable(&mut self) -> Option<&mut dyn RenderablePipe> {
        None
    }

    /// Per-build state capability
    fn as_stateful(&mut self) -> Option<&mut dyn StatefulPipe> {
        None
    }

    /// Subtree effect capability
    fn as_effect(&mut self) -> Option<&mut dyn EffectPipe> {
        None
    }
}

/// A pipe that draws a kind of drawable
pub trait RenderablePipe {
    /// Emit instructions or batch elements for `renderable` into `set`
    fn add_renderable(
        &mut self,
        id: RenderableId,
        renderable: &Renderable,
        set: &mut InstructionSet,
        ctx: &mut PipeContext<'_>,
    ) -> RenderResult<()>;

    /// Refresh per-drawable data in place without rebuilding the set
    fn update_renderable(&mut self, id: RenderableId, renderable: &Renderable, ctx: &mut PipeContext<'_>);

    /// Whether a change to `renderable` requires rebuilding its set
    fn validate_renderable(&mut self, id: RenderableId, renderable: &Renderable, ctx: &mut PipeContext<'_>) -> bool;

    /// Drop all per-drawable data
    fn destroy_renderable(&mut self, id: RenderableId, pools: &mut Pools);
}

/// A pipe with per-build state
pub trait StatefulPipe {
    /// A set is about to be rebuilt
    fn build_start(&mut self, set: &InstructionSet, ctx: &mut PipeContext<'_>);

    /// A set has been rebuilt
    fn build_end(&mut self, set: &mut InstructionSet, ctx: &mut PipeContext<'_>);
}

/// A pipe that wraps a subtree
pub trait EffectPipe {
    /// Enter the effect
    fn push(&mut self, effect: &Effect, set: &mut InstructionSet, ctx: &mut PipeContext<'_>) -> RenderResult<()>;

    /// Leave the effect
    fn pop(&mut self, effect: &Effect, set: &mut InstructionSet, ctx: &mut PipeContext<'_>) -> RenderResult<()>;
}

/// Whether a batched element must be rebuilt to reflect `renderable`
///
/// A texture change is applied in place when the new texture already owns a
/// slot in the element's batch.
pub(crate) fn batchable_needs_rebuild(
    element: &mut BatchableElement,
    renderable: &Renderable,
    ctx: &mut PipeContext<'_>,
) -> bool {
    if element.location().is_none()
        || element.blend_mode != renderable.blend_mode
        || element.batcher != renderable.batcher
        || element.vertex_count() != renderable.geometry.vertex_count()
        || element.index_count() != renderable.geometry.index_count()
    {
        return true;
    }
    if element.texture == renderable.texture {
        return !ctx.textures.is_valid(element.texture);
    }
    if !ctx.textures.is_valid(renderable.texture) {
        return true;
    }
    !ctx.batch.check_and_update_texture(element, renderable.texture)
}
