//! Headless device that records every command
//!
//! Used by tests, tooling and the demo host to observe exactly what the
//! pipeline asked the GPU to do.

use std::collections::{HashMap, HashSet};

use super::{
    BlendMode, BufferHandle, BufferUsage, ColorMask, DeviceError, FilterId, GpuDevice, GpuHandle,
    ShaderId, TextureHandle,
};
use crate::texture::TextureId;

/// A command received by [`RecordingDevice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Buffer created
    CreateBuffer {
        /// New handle
        buffer: BufferHandle,
        /// Debug label
        label: &'static str,
        /// Binding usage
        usage: BufferUsage,
    },
    /// Buffer contents replaced
    UploadBuffer {
        /// Target buffer
        buffer: BufferHandle,
        /// Uploaded size in bytes
        bytes: usize,
    },
    /// Texture made resident
    CreateTexture {
        /// Texture source
        source: TextureId,
        /// New handle
        texture: TextureHandle,
    },
    /// Texture bound to a slot
    BindTexture {
        /// Slot index
        slot: u32,
        /// Bound texture
        texture: TextureHandle,
    },
    /// Geometry bound
    BindGeometry {
        /// Vertex buffer
        vertices: BufferHandle,
        /// Index buffer
        indices: BufferHandle,
    },
    /// Shader bound
    BindShader(ShaderId),
    /// Blend state changed
    SetBlendMode(BlendMode),
    /// Colour mask changed
    SetColorMask(ColorMask),
    /// Filter pushed
    PushFilter(FilterId),
    /// Filter popped
    PopFilter,
    /// Indexed draw
    DrawIndexed {
        /// First index
        start: u32,
        /// Index count
        count: u32,
    },
    /// Handle released
    Release(GpuHandle),
}

/// [`GpuDevice`] implementation that keeps a command log and buffer contents
#[derive(Debug, Default)]
pub struct RecordingDevice {
    commands: Vec<DeviceCommand>,
    buffers: HashMap<BufferHandle, Vec<u8>>,
    textures: HashSet<TextureHandle>,
    failing_textures: HashSet<TextureId>,
    next_handle: u64,
    created_buffers: usize,
    created_textures: usize,
}

impl RecordingDevice {
    /// Create an empty device
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command received so far
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    /// Forget recorded commands, keeping device resources
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Current contents of a live buffer
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(Vec::as_slice)
    }

    /// Number of draw calls recorded
    pub fn draw_calls(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DeviceCommand::DrawIndexed { .. }))
            .count()
    }

    /// Number of buffer uploads recorded
    pub fn uploads(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, DeviceCommand::UploadBuffer { .. }))
            .count()
    }

    /// Buffers created over the device's lifetime
    pub const fn created_buffers(&self) -> usize {
        self.created_buffers
    }

    /// Textures created over the device's lifetime
    pub const fn created_textures(&self) -> usize {
        self.created_textures
    }

    /// Buffers currently alive
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Textures currently alive
    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    /// Make texture creation fail for `source` until [`Self::restore_texture`]
    pub fn fail_texture(&mut self, source: TextureId) {
        self.failing_textures.insert(source);
    }

    /// Let texture creation for `source` succeed again
    pub fn restore_texture(&mut self, source: TextureId) {
        self.failing_textures.remove(&source);
    }

    fn next_handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl GpuDevice for RecordingDevice {
    fn create_buffer(&mut self, label: &'static str, usage: BufferUsage) -> BufferHandle {
        let buffer = BufferHandle(self.next_handle());
        self.buffers.insert(buffer, Vec::new());
        self.created_buffers += 1;
        self.commands.push(DeviceCommand::CreateBuffer { buffer, label, usage });
        buffer
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]) {
        match self.buffers.get_mut(&buffer) {
            Some(contents) => {
                contents.clear();
                contents.extend_from_slice(data);
            }
            None => log::warn!("Upload to unknown buffer {:?}", buffer),
        }
        self.commands.push(DeviceCommand::UploadBuffer { buffer, bytes: data.len() });
    }

    fn create_texture(&mut self, source: TextureId, _width: u32, _height: u32) -> Result<TextureHandle, DeviceError> {
        if self.failing_textures.contains(&source) {
            return Err(DeviceError::TextureCreation {
                texture: source,
                reason: "upload rejected".to_string(),
            });
        }
        let texture = TextureHandle(self.next_handle());
        self.textures.insert(texture);
        self.created_textures += 1;
        self.commands.push(DeviceCommand::CreateTexture { source, texture });
        Ok(texture)
    }

    fn bind_texture(&mut self, slot: u32, texture: TextureHandle) {
        self.commands.push(DeviceCommand::BindTexture { slot, texture });
    }

    fn bind_geometry(&mut self, vertices: BufferHandle, indices: BufferHandle) {
        self.commands.push(DeviceCommand::BindGeometry { vertices, indices });
    }

    fn bind_shader(&mut self, shader: ShaderId) {
        self.commands.push(DeviceCommand::BindShader(shader));
    }

    fn set_blend_mode(&mut self, blend_mode: BlendMode) {
        self.commands.push(DeviceCommand::SetBlendMode(blend_mode));
    }

    fn set_color_mask(&mut self, mask: ColorMask) {
        self.commands.push(DeviceCommand::SetColorMask(mask));
    }

    fn push_filter(&mut self, filter: FilterId) {
        self.commands.push(DeviceCommand::PushFilter(filter));
    }

    fn pop_filter(&mut self) {
        self.commands.push(DeviceCommand::PopFilter);
    }

    fn draw_indexed(&mut self, start: u32, count: u32) {
        self.commands.push(DeviceCommand::DrawIndexed { start, count });
    }

    fn release(&mut self, handle: GpuHandle) {
        match handle {
            GpuHandle::Buffer(buffer) => {
                self.buffers.remove(&buffer);
            }
            GpuHandle::Texture(texture) => {
                self.textures.remove(&texture);
            }
        }
        self.commands.push(DeviceCommand::Release(handle));
    }
}
