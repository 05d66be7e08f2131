//! Drawables consumed by render pipes

use nalgebra::{Matrix3, Vector2};

use super::RenderGroupId;
use crate::device::BlendMode;
use crate::texture::TextureId;

/// Axis-aligned quad in local space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadGeometry {
    /// `[x0, y0, x1, y1]`
    pub bounds: [f32; 4],
    /// Texture coordinates for the corners (x0,y0) (x1,y0) (x1,y1) (x0,y1)
    pub uvs: [f32; 8],
}

impl QuadGeometry {
    /// UVs covering the whole texture
    pub const FULL_UVS: [f32; 8] = [0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];

    /// Quad of `width` x `height` anchored at the origin
    pub const fn from_size(width: f32, height: f32) -> Self {
        Self {
            bounds: [0.0, 0.0, width, height],
            uvs: Self::FULL_UVS,
        }
    }
}

/// Indexed triangle mesh in local space
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshGeometry {
    /// Interleaved `x, y` pairs
    pub positions: Vec<f32>,
    /// Interleaved `u, v` pairs, one per vertex
    pub uvs: Vec<f32>,
    /// Triangle list indices
    pub indices: Vec<u32>,
}

impl MeshGeometry {
    /// Create a mesh from raw attribute arrays
    pub const fn new(positions: Vec<f32>, uvs: Vec<f32>, indices: Vec<u32>) -> Self {
        Self { positions, uvs, indices }
    }

    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 2
    }

    /// Number of indices
    pub fn index_count(&self) -> usize {
        self.indices.len()
    }
}

/// Shape of a drawable
#[derive(Debug, Clone, PartialEq)]
pub enum RenderableGeometry {
    /// Textured quad
    Quad(QuadGeometry),
    /// Arbitrary triangle mesh
    Mesh(MeshGeometry),
}

impl RenderableGeometry {
    /// Number of vertices
    pub fn vertex_count(&self) -> usize {
        match self {
            Self::Quad(_) => 4,
            Self::Mesh(mesh) => mesh.vertex_count(),
        }
    }

    /// Number of indices
    pub fn index_count(&self) -> usize {
        match self {
            Self::Quad(_) => 6,
            Self::Mesh(mesh) => mesh.index_count(),
        }
    }
}

/// A drawable leaf of the scene
///
/// Public fields are read by pipes during builds. Mutating them through
/// [`Scene::renderable_mut`](super::Scene::renderable_mut) queues the
/// drawable for validation on the next frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Renderable {
    /// Name of the pipe that draws this renderable
    pub pipe: &'static str,
    /// Name of the batcher used when the drawable is batched
    pub batcher: &'static str,
    /// Texture source
    pub texture: TextureId,
    /// Compositing mode
    pub blend_mode: BlendMode,
    /// `0xRRGGBB` tint
    pub tint: u32,
    /// Opacity in `0.0..=1.0`
    pub alpha: f32,
    /// Precomputed world transform
    pub transform: Matrix3<f32>,
    /// Shape
    pub geometry: RenderableGeometry,
    /// Snap vertices to whole pixels
    pub round_pixels: bool,
    pub(crate) visible: bool,
    pub(crate) render_group: Option<RenderGroupId>,
    pub(crate) did_view_update: bool,
}

impl Renderable {
    /// Default batcher name
    pub const DEFAULT_BATCHER: &'static str = "default";

    fn new(pipe: &'static str, texture: TextureId, geometry: RenderableGeometry) -> Self {
        Self {
            pipe,
            batcher: Self::DEFAULT_BATCHER,
            texture,
            blend_mode: BlendMode::Normal,
            tint: 0x00FF_FFFF,
            alpha: 1.0,
            transform: Matrix3::identity(),
            geometry,
            round_pixels: false,
            visible: true,
            render_group: None,
            did_view_update: false,
        }
    }

    /// Textured quad drawn by the sprite pipe
    pub fn sprite(texture: TextureId, width: f32, height: f32) -> Self {
        Self::new("sprite", texture, RenderableGeometry::Quad(QuadGeometry::from_size(width, height)))
    }

    /// Triangle mesh drawn by the mesh pipe
    pub fn mesh(texture: TextureId, geometry: MeshGeometry) -> Self {
        Self::new("mesh", texture, RenderableGeometry::Mesh(geometry))
    }

    /// Route the drawable to a different pipe
    #[must_use]
    pub fn with_pipe(mut self, pipe: &'static str) -> Self {
        self.pipe = pipe;
        self
    }

    /// Route the drawable to a named batcher
    #[must_use]
    pub fn with_batcher(mut self, batcher: &'static str) -> Self {
        self.batcher = batcher;
        self
    }

    /// Set the compositing mode
    #[must_use]
    pub fn with_blend_mode(mut self, blend_mode: BlendMode) -> Self {
        self.blend_mode = blend_mode;
        self
    }

    /// Set the `0xRRGGBB` tint
    #[must_use]
    pub fn with_tint(mut self, tint: u32) -> Self {
        self.tint = tint;
        self
    }

    /// Set the opacity
    #[must_use]
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// Set the world transform
    #[must_use]
    pub fn with_transform(mut self, transform: Matrix3<f32>) -> Self {
        self.transform = transform;
        self
    }

    /// Translate the drawable to `(x, y)`
    #[must_use]
    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.set_position(x, y);
        self
    }

    /// Snap vertices to whole pixels
    #[must_use]
    pub fn with_round_pixels(mut self, round_pixels: bool) -> Self {
        self.round_pixels = round_pixels;
        self
    }

    /// Replace the world transform with a translation
    pub fn set_position(&mut self, x: f32, y: f32) {
        self.transform = Matrix3::new_translation(&Vector2::new(x, y));
    }

    /// Whether the drawable takes part in builds
    pub const fn is_visible(&self) -> bool {
        self.visible
    }

    /// Render group the drawable is attached to
    pub const fn render_group(&self) -> Option<RenderGroupId> {
        self.render_group
    }
}
