//! Per-set batch builder

use std::cell::RefCell;
use std::rc::Rc;

use super::packing::{write_indices, write_vertices, BatchVertex};
use super::{Batch, BatchAction, BatchLocation, BatchableElement};
use crate::config::BatcherConfig;
use crate::device::{BlendMode, BufferHandle, BufferUsage, GpuBuffer, GpuDevice, ReleaseQueue, ShaderId};
use crate::foundation::pool::Pools;
use crate::foundation::time::TimeMs;
use crate::gc::{GcResourceKind, GcSystem};
use crate::instructions::{Instruction, InstructionPayload, InstructionSet};
use crate::pipes::PipeId;
use crate::texture::TextureId;

/// Static description of a named batcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatcherDescriptor {
    /// Name drawables use to select the batcher
    pub name: &'static str,
    /// Shader bound at the start of each run
    pub shader: ShaderId,
    /// Texture slots available per batch
    pub max_textures: usize,
    /// Vertices reserved up front
    pub initial_vertex_capacity: usize,
    /// Indices reserved up front
    pub initial_index_capacity: usize,
}

impl BatcherDescriptor {
    /// Describe a batcher using the sizes from `config`
    pub const fn new(name: &'static str, shader: ShaderId, config: &BatcherConfig) -> Self {
        Self {
            name,
            shader,
            max_textures: config.max_batchable_textures,
            initial_vertex_capacity: config.initial_vertex_capacity,
            initial_index_capacity: config.initial_index_capacity,
        }
    }
}

/// CPU-side vertex and index data of one batcher plus its GPU buffers
#[derive(Debug)]
pub struct BatchGeometry {
    vertices: Vec<BatchVertex>,
    indices: Vec<u32>,
    vertex_buffer: Rc<RefCell<GpuBuffer>>,
    index_buffer: Rc<RefCell<GpuBuffer>>,
    dirty: bool,
}

impl BatchGeometry {
    fn new(descriptor: &BatcherDescriptor, release: &ReleaseQueue) -> Self {
        Self {
            vertices: Vec::with_capacity(descriptor.initial_vertex_capacity),
            indices: Vec::with_capacity(descriptor.initial_index_capacity),
            vertex_buffer: Rc::new(RefCell::new(GpuBuffer::new(
                "batch-vertices",
                BufferUsage::Vertex,
                release.clone(),
            ))),
            index_buffer: Rc::new(RefCell::new(GpuBuffer::new(
                "batch-indices",
                BufferUsage::Index,
                release.clone(),
            ))),
            dirty: false,
        }
    }

    /// Packed vertices
    pub fn vertices(&self) -> &[BatchVertex] {
        &self.vertices
    }

    /// Packed indices
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Vertex data as uploaded
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Index data as uploaded
    pub fn index_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.indices)
    }

    /// Whether CPU data changed since the last upload
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Vertex buffer handle, if resident
    pub fn vertex_handle(&self) -> Option<BufferHandle> {
        self.vertex_buffer.borrow().handle()
    }

    /// Index buffer handle, if resident
    pub fn index_handle(&self) -> Option<BufferHandle> {
        self.index_buffer.borrow().handle()
    }

    fn is_resident(&self) -> bool {
        self.vertex_buffer.borrow().is_resident() && self.index_buffer.borrow().is_resident()
    }

    fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.dirty = true;
    }

    fn append(&mut self, element: &BatchableElement, slot: u32, round_pixels: bool) -> (u32, u32) {
        let vertex_offset = self.vertices.len();
        let index_offset = self.indices.len();
        let vertex_start = to_u32(vertex_offset);

        self.vertices
            .resize(vertex_offset + element.vertex_count(), BatchVertex::default());
        self.indices.resize(index_offset + element.index_count(), 0);
        write_vertices(element, slot, round_pixels, &mut self.vertices[vertex_offset..]);
        write_indices(element, vertex_start, &mut self.indices[index_offset..]);
        self.dirty = true;

        (vertex_start, to_u32(index_offset))
    }

    fn rewrite(&mut self, element: &BatchableElement, location: &BatchLocation, round_pixels: bool) -> bool {
        let vertices = location.vertex_offset as usize..location.vertex_offset as usize + element.vertex_count();
        let indices = location.index_offset as usize..location.index_offset as usize + element.index_count();
        if vertices.end > self.vertices.len() || indices.end > self.indices.len() {
            log::warn!("Element no longer fits its batch location, rebuild required");
            return false;
        }
        write_vertices(element, location.texture_slot, round_pixels, &mut self.vertices[vertices]);
        write_indices(element, location.vertex_offset, &mut self.indices[indices]);
        self.dirty = true;
        true
    }

    fn upload(&mut self, device: &mut dyn GpuDevice, gc: &mut GcSystem, now: TimeMs) -> bool {
        let uploaded = self.dirty || !self.is_resident();
        if uploaded {
            self.vertex_buffer.borrow_mut().upload(device, bytemuck::cast_slice(&self.vertices));
            self.index_buffer.borrow_mut().upload(device, bytemuck::cast_slice(&self.indices));
            self.dirty = false;
        }
        for buffer in [&self.vertex_buffer, &self.index_buffer] {
            if let Err(e) = gc.add_resource(buffer, GcResourceKind::Resource, now) {
                log::warn!("GC: {}, retrying next upload", e);
            }
        }
        uploaded
    }

    fn untrack(&self, gc: &mut GcSystem) {
        gc.remove_resource(&mut *self.vertex_buffer.borrow_mut());
        gc.remove_resource(&mut *self.index_buffer.borrow_mut());
    }
}

fn to_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Builds batches for one named batcher within one instruction set
#[derive(Debug)]
pub struct Batcher {
    index: u16,
    descriptor: BatcherDescriptor,
    geometry: BatchGeometry,
    batches: Vec<Batch>,
    current: Option<Batch>,
    run_started: bool,
    flushed_blend: Option<BlendMode>,
}

impl Batcher {
    pub(crate) fn new(index: u16, descriptor: BatcherDescriptor, release: &ReleaseQueue) -> Self {
        let geometry = BatchGeometry::new(&descriptor, release);
        Self {
            index,
            descriptor,
            geometry,
            batches: Vec::new(),
            current: None,
            run_started: false,
            flushed_blend: None,
        }
    }

    /// Batcher description
    pub const fn descriptor(&self) -> &BatcherDescriptor {
        &self.descriptor
    }

    /// Packed geometry
    pub const fn geometry(&self) -> &BatchGeometry {
        &self.geometry
    }

    /// Finished batches in instruction order
    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    /// Finished batch by index
    pub fn batch(&self, index: u32) -> Option<&Batch> {
        self.batches.get(index as usize)
    }

    pub(crate) fn reset(&mut self, pools: &mut Pools) {
        for batch in self.batches.drain(..) {
            pools.put(batch);
        }
        if let Some(batch) = self.current.take() {
            pools.put(batch);
        }
        self.geometry.clear();
        self.run_started = false;
        self.flushed_blend = None;
    }

    pub(crate) fn add(
        &mut self,
        element: &mut BatchableElement,
        set: &mut InstructionSet,
        pools: &mut Pools,
        round_pixels: bool,
    ) {
        if let Some(current) = &self.current {
            let texture_fits = current.textures.contains(element.texture)
                || current.textures.len() < self.descriptor.max_textures;
            if current.blend_mode != element.blend_mode || !texture_fits {
                self.finish_current(set);
            }
        }

        let start = to_u32(self.geometry.indices.len());
        let blend_mode = element.blend_mode;
        let batch = self.current.get_or_insert_with(|| {
            let mut batch: Batch = pools.get();
            batch.blend_mode = blend_mode;
            batch.start = start;
            batch
        });
        let slot = match batch.textures.slot_of(element.texture) {
            Some(slot) => slot,
            None => batch.textures.push(element.texture),
        };

        let (vertex_offset, index_offset) = self.geometry.append(element, slot, round_pixels);
        batch.size += to_u32(element.index_count());
        batch.element_count += 1;

        element.location = Some(BatchLocation {
            set: set.id(),
            batcher: self.index,
            batch: to_u32(self.batches.len()),
            vertex_offset,
            index_offset,
            texture_slot: slot,
        });
    }

    fn finish_current(&mut self, set: &mut InstructionSet) {
        let Some(mut batch) = self.current.take() else {
            return;
        };
        batch.action = if self.run_started {
            BatchAction::RenderBatch
        } else {
            BatchAction::StartBatch
        };
        self.run_started = true;
        self.flushed_blend = Some(batch.blend_mode);

        let index = to_u32(self.batches.len());
        self.batches.push(batch);
        set.add(Instruction::new(
            PipeId::BATCH,
            InstructionPayload::Batch {
                batcher: self.index,
                batch: index,
            },
        ));
    }

    /// Finish the current batch and end the run
    pub(crate) fn break_batch(&mut self, set: &mut InstructionSet) {
        self.finish_current(set);
        self.run_started = false;
    }

    pub(crate) fn take_flushed_blend(&mut self) -> Option<BlendMode> {
        self.flushed_blend.take()
    }

    pub(crate) fn rewrite(&mut self, element: &BatchableElement, round_pixels: bool) -> bool {
        match &element.location {
            Some(location) => self.geometry.rewrite(element, location, round_pixels),
            None => false,
        }
    }

    pub(crate) fn swap_texture(&self, element: &mut BatchableElement, texture: TextureId) -> bool {
        let Some(mut location) = element.location else {
            return false;
        };
        let Some(slot) = self.batch(location.batch).and_then(|b| b.textures.slot_of(texture)) else {
            return false;
        };
        element.texture = texture;
        location.texture_slot = slot;
        element.location = Some(location);
        true
    }

    pub(crate) fn upload(&mut self, device: &mut dyn GpuDevice, gc: &mut GcSystem, now: TimeMs) -> bool {
        if self.geometry.indices.is_empty() {
            return false;
        }
        self.geometry.upload(device, gc, now)
    }

    pub(crate) fn untrack(&self, gc: &mut GcSystem) {
        self.geometry.untrack(gc);
    }
}
