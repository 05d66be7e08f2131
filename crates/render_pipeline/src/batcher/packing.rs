//! Vertex layout and packing shared by batched and direct draws
//!
//! Both the append path (fresh build) and the in-place update path write
//! through [`write_vertices`] / [`write_indices`], which is what keeps an
//! updated buffer byte-identical to a rebuilt one.

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use nalgebra::Matrix3;

use super::BatchableElement;
use crate::scene::RenderableGeometry;

/// Quad triangle list, relative to the quad's first vertex
pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 0, 2, 3];

/// Interleaved batch vertex (24 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct BatchVertex {
    /// World-space position
    pub position: [f32; 2],
    /// Texture coordinates
    pub uv: [f32; 2],
    /// Premultiplied `0xAARRGGBB`
    pub color: u32,
    /// Texture slot in the high 16 bits, [`VertexFlags`] in the low 16
    pub texture_id_and_flags: u32,
}

bitflags! {
    /// Per-vertex flags packed below the texture slot
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VertexFlags: u16 {
        /// Snap the vertex to whole pixels in the shader
        const ROUND_PIXELS = 1 << 0;
    }
}

/// Pack a `0xRRGGBB` tint and an alpha into premultiplied `0xAARRGGBB`
pub fn pack_color(tint: u32, alpha: f32) -> u32 {
    let alpha = alpha.clamp(0.0, 1.0);
    let channel = |shift: u32| {
        let value = ((tint >> shift) & 0xFF) as f32;
        (value * alpha).round() as u32
    };
    let a = (alpha * 255.0).round() as u32;
    (a << 24) | (channel(16) << 16) | (channel(8) << 8) | channel(0)
}

/// Pack a texture slot and flags into one attribute
pub fn pack_texture_id_and_flags(slot: u32, flags: VertexFlags) -> u32 {
    (slot << 16) | u32::from(flags.bits())
}

fn transform_point(m: &Matrix3<f32>, x: f32, y: f32) -> [f32; 2] {
    [
        m[(0, 0)] * x + m[(0, 1)] * y + m[(0, 2)],
        m[(1, 0)] * x + m[(1, 1)] * y + m[(1, 2)],
    ]
}

/// Write `element`'s vertices into the front of `out`
pub fn write_vertices(element: &BatchableElement, slot: u32, round_pixels: bool, out: &mut [BatchVertex]) {
    let mut flags = VertexFlags::empty();
    flags.set(VertexFlags::ROUND_PIXELS, round_pixels || element.round_pixels);
    let texture_id_and_flags = pack_texture_id_and_flags(slot, flags);
    let color = element.color;
    let m = &element.transform;

    match &element.geometry {
        RenderableGeometry::Quad(quad) => {
            let [x0, y0, x1, y1] = quad.bounds;
            let corners = [(x0, y0), (x1, y0), (x1, y1), (x0, y1)];
            for (i, (vertex, (x, y))) in out.iter_mut().zip(corners).enumerate() {
                *vertex = BatchVertex {
                    position: transform_point(m, x, y),
                    uv: [quad.uvs[i * 2], quad.uvs[i * 2 + 1]],
                    color,
                    texture_id_and_flags,
                };
            }
        }
        RenderableGeometry::Mesh(mesh) => {
            for (i, vertex) in out.iter_mut().take(mesh.vertex_count()).enumerate() {
                let uv = |k: usize| mesh.uvs.get(i * 2 + k).copied().unwrap_or(0.0);
                *vertex = BatchVertex {
                    position: transform_point(m, mesh.positions[i * 2], mesh.positions[i * 2 + 1]),
                    uv: [uv(0), uv(1)],
                    color,
                    texture_id_and_flags,
                };
            }
        }
    }
}

/// Write `element`'s indices, offset by `vertex_offset`, into the front of `out`
pub fn write_indices(element: &BatchableElement, vertex_offset: u32, out: &mut [u32]) {
    let source: &[u32] = match &element.geometry {
        RenderableGeometry::Quad(_) => &QUAD_INDICES,
        RenderableGeometry::Mesh(mesh) => &mesh.indices,
    };
    for (dst, index) in out.iter_mut().zip(source) {
        *dst = index + vertex_offset;
    }
}
