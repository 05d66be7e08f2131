//! Batchable elements: the per-drawable unit the batcher packs

use nalgebra::Matrix3;

use super::packing::pack_color;
use crate::device::BlendMode;
use crate::foundation::pool::Poolable;
use crate::instructions::InstructionSetId;
use crate::scene::{QuadGeometry, Renderable, RenderableGeometry, RenderableId};
use crate::texture::TextureId;

/// Where an element's data lives after it was added to a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLocation {
    /// Owning instruction set
    pub set: InstructionSetId,
    /// Batcher index within the set
    pub batcher: u16,
    /// Batch index within the batcher
    pub batch: u32,
    /// First vertex in the batcher's vertex buffer
    pub vertex_offset: u32,
    /// First index in the batcher's index buffer
    pub index_offset: u32,
    /// Texture slot inside the batch
    pub texture_slot: u32,
}

/// A drawable's batching inputs plus its assigned location
///
/// Owned by the pipe that created it and recycled through
/// [`Pools`](crate::foundation::pool::Pools).
#[derive(Debug, Clone, PartialEq)]
pub struct BatchableElement {
    /// Drawable this element belongs to
    pub renderable: Option<RenderableId>,
    /// Texture source
    pub texture: TextureId,
    /// Compositing mode
    pub blend_mode: BlendMode,
    /// Batcher name
    pub batcher: &'static str,
    /// Premultiplied `0xAARRGGBB`
    pub color: u32,
    /// Snap to whole pixels
    pub round_pixels: bool,
    /// World transform
    pub transform: Matrix3<f32>,
    /// Shape
    pub geometry: RenderableGeometry,
    pub(crate) location: Option<BatchLocation>,
}

impl Default for BatchableElement {
    fn default() -> Self {
        Self {
            renderable: None,
            texture: TextureId(0),
            blend_mode: BlendMode::Normal,
            batcher: Renderable::DEFAULT_BATCHER,
            color: 0xFFFF_FFFF,
            round_pixels: false,
            transform: Matrix3::identity(),
            geometry: RenderableGeometry::Quad(QuadGeometry::from_size(0.0, 0.0)),
            location: None,
        }
    }
}

impl Poolable for BatchableElement {
    fn reset(&mut self) {
        self.renderable = None;
        self.texture = TextureId(0);
        self.blend_mode = BlendMode::Normal;
        self.batcher = Renderable::DEFAULT_BATCHER;
        self.color = 0xFFFF_FFFF;
        self.round_pixels = false;
        self.transform = Matrix3::identity();
        if let RenderableGeometry::Mesh(mesh) = &mut self.geometry {
            mesh.positions.clear();
            mesh.uvs.clear();
            mesh.indices.clear();
        } else {
            self.geometry = RenderableGeometry::Quad(QuadGeometry::from_size(0.0, 0.0));
        }
        self.location = None;
    }
}

impl BatchableElement {
    /// Copy batching inputs from a drawable, keeping the assigned location
    pub fn sync_from(&mut self, id: RenderableId, renderable: &Renderable) {
        self.renderable = Some(id);
        self.texture = renderable.texture;
        self.blend_mode = renderable.blend_mode;
        self.batcher = renderable.batcher;
        self.color = pack_color(renderable.tint, renderable.alpha);
        self.round_pixels = renderable.round_pixels;
        self.transform = renderable.transform;
        self.geometry.clone_from(&renderable.geometry);
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.geometry.vertex_count()
    }

    /// Number of indices
    pub fn index_count(&self) -> usize {
        self.geometry.index_count()
    }

    /// Assigned location, if the element is part of a built batch
    pub const fn location(&self) -> Option<BatchLocation> {
        self.location
    }
}
