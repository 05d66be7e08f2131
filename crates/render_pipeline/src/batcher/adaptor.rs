//! Backend hooks for drawing batches

use super::{Batch, BatchGeometry};
use crate::device::{ShaderId, TextureHandle};
use crate::pipes::ExecuteContext;
use crate::{RenderError, RenderResult};

/// Result of executing one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The batch was drawn
    Drawn,
    /// A resource was unavailable; the batch was skipped for this frame
    Skipped,
}

/// Binds geometry and draws batches on a device
pub trait BatcherAdaptor {
    /// Bind a batcher's geometry and shader at the start of a run
    fn start(&mut self, geometry: &BatchGeometry, shader: ShaderId, ctx: &mut ExecuteContext<'_>) -> RenderResult<()>;

    /// Bind a batch's state and textures and draw it
    fn execute(&mut self, batch: &Batch, ctx: &mut ExecuteContext<'_>) -> RenderResult<BatchOutcome>;
}

/// [`BatcherAdaptor`] for any [`GpuDevice`](crate::device::GpuDevice)
#[derive(Debug, Default)]
pub struct DeviceBatcherAdaptor {
    bound: Vec<TextureHandle>,
}

impl DeviceBatcherAdaptor {
    /// Create the adaptor
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatcherAdaptor for DeviceBatcherAdaptor {
    fn start(&mut self, geometry: &BatchGeometry, shader: ShaderId, ctx: &mut ExecuteContext<'_>) -> RenderResult<()> {
        let (Some(vertices), Some(indices)) = (geometry.vertex_handle(), geometry.index_handle()) else {
            return Err(RenderError::Execute {
                pipe: "batch",
                reason: "batch geometry was not uploaded".to_string(),
            });
        };
        ctx.device.bind_geometry(vertices, indices);
        ctx.device.bind_shader(shader);
        Ok(())
    }

    fn execute(&mut self, batch: &Batch, ctx: &mut ExecuteContext<'_>) -> RenderResult<BatchOutcome> {
        ctx.device.set_blend_mode(batch.blend_mode);
        self.bound.clear();
        for &texture in batch.textures.as_slice() {
            match ctx.textures.bind(texture, &mut *ctx.device, ctx.now) {
                Ok(handle) => self.bound.push(handle),
                Err(e) => {
                    log::warn!("Skipping batch of {} elements: {}", batch.element_count, e);
                    return Ok(BatchOutcome::Skipped);
                }
            }
        }

        for (slot, handle) in (0u32..).zip(&self.bound) {
            ctx.device.bind_texture(slot, *handle);
        }
        ctx.device.draw_indexed(batch.start, batch.size);
        Ok(BatchOutcome::Drawn)
    }
}
