//! # Abstract GPU Device
//!
//! The pipeline never talks to a graphics API directly. Everything it needs
//! from the GPU goes through [`GpuDevice`]: buffer creation and upload,
//! texture residency, state binding and indexed draws.
//!
//! ## Resource Lifetime
//!
//! GPU handles are owned by pipeline-side wrappers ([`GpuBuffer`],
//! resident textures, cached mesh data). When one of those is unloaded by
//! garbage collection or dropped, its handle is pushed onto the shared
//! [`ReleaseQueue`]; the renderer flushes the queue into
//! [`GpuDevice::release`] at the start of the next frame. Unload hooks
//! therefore never need device access and never interrupt a frame.

mod buffer;
mod recording;
mod state;

use std::cell::RefCell;
use std::rc::Rc;

use crate::texture::TextureId;

pub use buffer::{BufferUsage, GpuBuffer};
pub use recording::{DeviceCommand, RecordingDevice};
pub use state::{BlendMode, ColorMask, FilterId, ShaderId};

/// Device-side buffer handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

/// Device-side texture handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// Any handle the device can release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuHandle {
    /// Vertex or index buffer
    Buffer(BufferHandle),
    /// Texture
    Texture(TextureHandle),
}

/// Device errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// Texture upload failed
    #[error("Failed to create texture for {texture:?}: {reason}")]
    TextureCreation {
        /// Texture the upload was for
        texture: TextureId,
        /// Failure description
        reason: String,
    },

    /// The device can no longer accept work
    #[error("Device lost")]
    Lost,
}

/// Minimal GPU surface consumed by the pipeline
pub trait GpuDevice {
    /// Create an empty buffer
    fn create_buffer(&mut self, label: &'static str, usage: BufferUsage) -> BufferHandle;

    /// Replace a buffer's contents, resizing it as needed
    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]);

    /// Make a texture source resident
    fn create_texture(&mut self, source: TextureId, width: u32, height: u32) -> Result<TextureHandle, DeviceError>;

    /// Bind a resident texture to a batch texture slot
    fn bind_texture(&mut self, slot: u32, texture: TextureHandle);

    /// Bind vertex and index buffers for subsequent draws
    fn bind_geometry(&mut self, vertices: BufferHandle, indices: BufferHandle);

    /// Bind a shader program
    fn bind_shader(&mut self, shader: ShaderId);

    /// Set the blend state
    fn set_blend_mode(&mut self, blend_mode: BlendMode);

    /// Set the colour write mask
    fn set_color_mask(&mut self, mask: ColorMask);

    /// Start rendering into a filter's input
    fn push_filter(&mut self, filter: FilterId);

    /// Apply the most recently pushed filter
    fn pop_filter(&mut self);

    /// Draw `count` indices starting at `start` from the bound geometry
    fn draw_indexed(&mut self, start: u32, count: u32);

    /// Destroy a buffer or texture
    fn release(&mut self, handle: GpuHandle);
}

/// Deferred GPU handle destruction
///
/// Cloned into every object that owns device handles; flushed once per
/// frame by the renderer.
#[derive(Debug, Clone, Default)]
pub struct ReleaseQueue {
    pending: Rc<RefCell<Vec<GpuHandle>>>,
}

impl ReleaseQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a handle for destruction
    pub fn push(&self, handle: GpuHandle) {
        self.pending.borrow_mut().push(handle);
    }

    /// Number of handles waiting for release
    pub fn len(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Whether nothing is waiting for release
    pub fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    /// Release every pending handle on `device`
    pub fn flush(&self, device: &mut dyn GpuDevice) -> usize {
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        let count = pending.len();
        for handle in pending {
            device.release(handle);
        }
        if count > 0 {
            log::debug!("Released {} GPU handles", count);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_queue_is_shared_and_flushes_once() {
        let queue = ReleaseQueue::new();
        let owner = queue.clone();
        owner.push(GpuHandle::Buffer(BufferHandle(3)));
        owner.push(GpuHandle::Texture(TextureHandle(4)));
        assert_eq!(queue.len(), 2);

        let mut device = RecordingDevice::new();
        assert_eq!(queue.flush(&mut device), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.flush(&mut device), 0);

        let released = device
            .commands()
            .iter()
            .filter(|c| matches!(c, DeviceCommand::Release(_)))
            .count();
        assert_eq!(released, 2);
    }

    #[test]
    fn test_color_mask_defaults_to_all_channels() {
        assert_eq!(ColorMask::default(), ColorMask::RED | ColorMask::GREEN | ColorMask::BLUE | ColorMask::ALPHA);
    }
}
