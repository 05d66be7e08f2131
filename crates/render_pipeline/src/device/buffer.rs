//! Garbage-collected GPU buffers

use super::{BufferHandle, GpuDevice, GpuHandle, ReleaseQueue};
use crate::gc::{GcData, GcResource};
use crate::GcError;

/// What a buffer is bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Vertex attributes
    Vertex,
    /// 32-bit indices
    Index,
}

/// A device buffer created lazily on first upload
///
/// The handle is released through the [`ReleaseQueue`] when the buffer is
/// unloaded by garbage collection or dropped; the next upload creates a new
/// one.
#[derive(Debug)]
pub struct GpuBuffer {
    label: &'static str,
    usage: BufferUsage,
    handle: Option<BufferHandle>,
    byte_len: usize,
    uploads: u64,
    gc: GcData,
    release: ReleaseQueue,
}

impl GpuBuffer {
    /// Create a buffer that is not yet resident
    pub fn new(label: &'static str, usage: BufferUsage, release: ReleaseQueue) -> Self {
        Self {
            label,
            usage,
            handle: None,
            byte_len: 0,
            uploads: 0,
            gc: GcData::default(),
            release,
        }
    }

    /// Upload `data`, creating the device buffer if needed
    pub fn upload(&mut self, device: &mut dyn GpuDevice, data: &[u8]) -> BufferHandle {
        let handle = *self
            .handle
            .get_or_insert_with(|| device.create_buffer(self.label, self.usage));
        device.upload_buffer(handle, data);
        self.byte_len = data.len();
        self.uploads += 1;
        handle
    }

    /// Device handle, if resident
    pub const fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    /// Whether the buffer currently exists on the device
    pub const fn is_resident(&self) -> bool {
        self.handle.is_some()
    }

    /// Size of the last upload in bytes
    pub const fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Number of uploads performed over the buffer's lifetime
    pub const fn uploads(&self) -> u64 {
        self.uploads
    }

    /// Debug label
    pub const fn label(&self) -> &'static str {
        self.label
    }

    /// Queue the device handle for release; returns whether one existed
    pub fn release(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                self.release.push(GpuHandle::Buffer(handle));
                self.byte_len = 0;
                true
            }
            None => false,
        }
    }
}

impl GcResource for GpuBuffer {
    fn gc_data(&self) -> &GcData {
        &self.gc
    }

    fn gc_data_mut(&mut self) -> &mut GcData {
        &mut self.gc
    }

    fn unload(&mut self) -> Result<(), GcError> {
        self.release();
        Ok(())
    }

    fn label(&self) -> &str {
        self.label
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RecordingDevice;

    #[test]
    fn test_buffer_created_on_first_upload() {
        let release = ReleaseQueue::new();
        let mut device = RecordingDevice::new();
        let mut buffer = GpuBuffer::new("test-vertices", BufferUsage::Vertex, release.clone());
        assert!(!buffer.is_resident());

        let first = buffer.upload(&mut device, &[1, 2, 3, 4]);
        let second = buffer.upload(&mut device, &[5, 6]);
        assert_eq!(first, second);
        assert_eq!(buffer.uploads(), 2);
        assert_eq!(buffer.byte_len(), 2);
        assert_eq!(device.buffer_data(first), Some(&[5u8, 6][..]));
        assert_eq!(device.created_buffers(), 1);
    }

    #[test]
    fn test_unload_and_drop_release_handle_once() {
        let release = ReleaseQueue::new();
        let mut device = RecordingDevice::new();
        let mut buffer = GpuBuffer::new("test-indices", BufferUsage::Index, release.clone());
        buffer.upload(&mut device, &[0; 12]);

        buffer.unload().unwrap();
        assert!(!buffer.is_resident());
        assert_eq!(release.len(), 1);

        drop(buffer);
        assert_eq!(release.len(), 1);
    }
}
