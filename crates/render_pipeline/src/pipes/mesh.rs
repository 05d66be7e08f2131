//! # Mesh Pipe
//!
//! Small meshes are merged into batches like sprites. Meshes with more
//! vertices than `mesh_batch_vertex_limit` are drawn on their own: the pipe
//! keeps their packed CPU geometry per drawable and caches the GPU copy in a
//! [`GcManagedHash`] whose entries are refreshed by the traversal tick of
//! the instruction set that draws them, so a mesh that leaves the screen
//! loses its buffers after the GC idle period.

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::rc::Rc;

use super::{
    batchable_needs_rebuild, ExecuteContext, PipeContext, PipeId, PipeInit, RenderPipe, RenderablePipe,
};
use crate::batcher::{write_indices, write_vertices, BatchVertex, BatchableElement};
use crate::config::BatcherConfig;
use crate::device::{BufferUsage, GpuBuffer, GpuDevice, ReleaseQueue, ShaderId};
use crate::foundation::pool::Pools;
use crate::gc::{GcData, GcManagedHash, GcResource, GcResourceKind};
use crate::instructions::{Instruction, InstructionPayload, InstructionSet, TickHandle};
use crate::scene::{Renderable, RenderableId};
use crate::{GcError, RenderError, RenderResult};

/// Unbatched draw counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MeshStats {
    /// Meshes drawn
    pub drawn: u64,
    /// Meshes skipped because their texture was unavailable
    pub skipped: u64,
    /// Geometry uploads
    pub uploads: u64,
}

#[derive(Debug)]
struct UnbatchedMesh {
    element: BatchableElement,
    vertices: Vec<BatchVertex>,
    indices: Vec<u32>,
    revision: u64,
}

impl UnbatchedMesh {
    fn new(element: BatchableElement) -> Self {
        Self {
            element,
            vertices: Vec::new(),
            indices: Vec::new(),
            revision: 0,
        }
    }

    /// Repack the element; the revision only moves when the data changed
    fn pack(&mut self, round_pixels: bool, scratch: &mut (Vec<BatchVertex>, Vec<u32>)) -> bool {
        let (vertices, indices) = scratch;
        vertices.clear();
        vertices.resize(self.element.vertex_count(), BatchVertex::default());
        indices.clear();
        indices.resize(self.element.index_count(), 0);
        write_vertices(&self.element, 0, round_pixels, vertices);
        write_indices(&self.element, 0, indices);

        let changed = self.revision == 0 || *vertices != self.vertices || *indices != self.indices;
        if changed {
            std::mem::swap(vertices, &mut self.vertices);
            std::mem::swap(indices, &mut self.indices);
            self.revision += 1;
        }
        changed
    }

    fn index_count(&self) -> u32 {
        u32::try_from(self.indices.len()).unwrap_or(u32::MAX)
    }
}

/// GPU copy of an unbatched mesh
#[derive(Debug)]
pub struct MeshGpuData {
    vertices: GpuBuffer,
    indices: GpuBuffer,
    revision: Option<u64>,
    tick: TickHandle,
    gc: GcData,
}

impl MeshGpuData {
    fn new(release: &ReleaseQueue, tick: TickHandle) -> Self {
        Self {
            vertices: GpuBuffer::new("mesh-vertices", BufferUsage::Vertex, release.clone()),
            indices: GpuBuffer::new("mesh-indices", BufferUsage::Index, release.clone()),
            revision: None,
            tick,
            gc: GcData::new(GcResourceKind::Renderable),
        }
    }

    /// CPU revision last uploaded
    pub const fn revision(&self) -> Option<u64> {
        self.revision
    }

    /// Whether both buffers exist on the device
    pub const fn is_resident(&self) -> bool {
        self.vertices.is_resident() && self.indices.is_resident()
    }

    fn upload(&mut self, device: &mut dyn GpuDevice, mesh: &UnbatchedMesh) {
        self.vertices.upload(device, bytemuck::cast_slice(&mesh.vertices));
        self.indices.upload(device, bytemuck::cast_slice(&mesh.indices));
        self.revision = Some(mesh.revision);
    }
}

impl GcResource for MeshGpuData {
    fn gc_data(&self) -> &GcData {
        &self.gc
    }

    fn gc_data_mut(&mut self) -> &mut GcData {
        &mut self.gc
    }

    fn unload(&mut self) -> Result<(), GcError> {
        self.vertices.release();
        self.indices.release();
        self.revision = None;
        Ok(())
    }

    fn last_traversed_tick(&self) -> Option<u64> {
        Some(self.tick.get())
    }

    fn label(&self) -> &str {
        "mesh-geometry"
    }
}

/// Draws triangle meshes, batched or on their own depending on size
pub struct MeshPipe {
    id: PipeId,
    vertex_limit: usize,
    round_pixels: bool,
    release: ReleaseQueue,
    batched: HashMap<RenderableId, BatchableElement>,
    unbatched: HashMap<RenderableId, UnbatchedMesh>,
    gpu: Rc<RefCell<GcManagedHash<RenderableId, MeshGpuData>>>,
    scratch: (Vec<BatchVertex>, Vec<u32>),
    stats: MeshStats,
}

impl std::fmt::Debug for MeshPipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshPipe")
            .field("id", &self.id)
            .field("vertex_limit", &self.vertex_limit)
            .field("batched", &self.batched.len())
            .field("unbatched", &self.unbatched.len())
            .field("resident", &self.gpu.borrow().len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Default for MeshPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshPipe {
    /// Pipe name
    pub const NAME: &'static str = "mesh";

    /// GC sweep priority of the GPU geometry cache
    pub const GC_PRIORITY: i32 = 1;

    /// Create the pipe; limits are taken from the renderer config on init
    pub fn new() -> Self {
        Self {
            id: PipeId::FIRST_USER,
            vertex_limit: BatcherConfig::default().mesh_batch_vertex_limit,
            round_pixels: false,
            release: ReleaseQueue::new(),
            batched: HashMap::new(),
            unbatched: HashMap::new(),
            gpu: Rc::new(RefCell::new(GcManagedHash::new(
                "mesh-geometry",
                GcResourceKind::Renderable,
            ))),
            scratch: (Vec::new(), Vec::new()),
            stats: MeshStats::default(),
        }
    }

    /// Unbatched draw counters
    pub const fn stats(&self) -> MeshStats {
        self.stats
    }

    /// Whether `renderable` goes through the batcher
    pub fn is_batched(&self, renderable: &Renderable) -> bool {
        renderable.geometry.vertex_count() <= self.vertex_limit
    }

    /// Whether `id` currently has GPU geometry of its own
    pub fn is_resident(&self, id: RenderableId) -> bool {
        self.gpu
            .borrow()
            .get(&id)
            .is_some_and(MeshGpuData::is_resident)
    }

    /// Number of unbatched meshes with CPU geometry
    pub fn unbatched_count(&self) -> usize {
        self.unbatched.len()
    }

    fn drop_unbatched(&mut self, id: RenderableId, pools: &mut Pools) {
        if let Some(mesh) = self.unbatched.remove(&id) {
            pools.put(mesh.element);
        }
        self.gpu.borrow_mut().destroy(&id);
    }

    fn add_batched(
        &mut self,
        id: RenderableId,
        renderable: &Renderable,
        set: &mut InstructionSet,
        ctx: &mut PipeContext<'_>,
    ) -> RenderResult<()> {
        self.drop_unbatched(id, ctx.pools);
        let element = match self.batched.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(ctx.pools.get()),
        };
        element.sync_from(id, renderable);
        element.location = None;
        if !ctx.textures.is_valid(element.texture) {
            log::debug!("Mesh {:?} skipped: texture {:?} is destroyed", id, element.texture);
            return Ok(());
        }
        ctx.batch.add_to_batch(element, set, ctx.pools)
    }

    fn add_unbatched(
        &mut self,
        id: RenderableId,
        renderable: &Renderable,
        set: &mut InstructionSet,
        ctx: &mut PipeContext<'_>,
    ) {
        if let Some(element) = self.batched.remove(&id) {
            ctx.pools.put(element);
        }
        let mesh = match self.unbatched.entry(id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(UnbatchedMesh::new(ctx.pools.get())),
        };
        mesh.element.sync_from(id, renderable);
        mesh.pack(self.round_pixels, &mut self.scratch);
        if !ctx.textures.is_valid(mesh.element.texture) {
            log::debug!("Mesh {:?} skipped: texture {:?} is destroyed", id, mesh.element.texture);
            return;
        }

        ctx.blend_mode.set_blend_mode(renderable.blend_mode, set, ctx.batch);
        set.add(Instruction::new(self.id, InstructionPayload::Renderable(id)));
    }
}

impl RenderPipe for MeshPipe {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn init(&mut self, init: PipeInit<'_>) -> RenderResult<()> {
        self.id = init.id;
        self.vertex_limit = init.config.batcher.mesh_batch_vertex_limit;
        self.round_pixels = init.config.round_pixels;
        self.release = init.release.clone();
        init.gc.add_resource_hash(&self.gpu, Self::GC_PRIORITY);
        Ok(())
    }

    fn execute(&mut self, instruction: &Instruction, ctx: &mut ExecuteContext<'_>) -> RenderResult<()> {
        let InstructionPayload::Renderable(id) = instruction.payload else {
            return Err(RenderError::Execute {
                pipe: Self::NAME,
                reason: format!("unexpected payload {:?}", instruction.payload),
            });
        };
        let Some(mesh) = self.unbatched.get(&id) else {
            return Err(RenderError::Execute {
                pipe: Self::NAME,
                reason: format!("no geometry for {:?}", id),
            });
        };

        let texture = match ctx.textures.bind(mesh.element.texture, &mut *ctx.device, ctx.now) {
            Ok(texture) => texture,
            Err(e) => {
                log::warn!("Skipping mesh {:?}: {}", id, e);
                self.stats.skipped += 1;
                return Ok(());
            }
        };

        let mut gpu = self.gpu.borrow_mut();
        if !gpu.touch(&id, ctx.now) {
            gpu.insert(id, MeshGpuData::new(&self.release, ctx.set_tick.clone()), ctx.now);
        }
        let Some(data) = gpu.get_mut(&id) else {
            return Err(RenderError::Execute {
                pipe: Self::NAME,
                reason: format!("geometry cache lost {:?}", id),
            });
        };
        data.tick = ctx.set_tick.clone();
        if data.revision != Some(mesh.revision) || !data.is_resident() {
            data.upload(&mut *ctx.device, mesh);
            self.stats.uploads += 1;
        }
        let (Some(vertices), Some(indices)) = (data.vertices.handle(), data.indices.handle()) else {
            return Err(RenderError::Execute {
                pipe: Self::NAME,
                reason: format!("geometry of {:?} is not resident", id),
            });
        };

        ctx.device.bind_geometry(vertices, indices);
        ctx.device.bind_shader(ShaderId::MESH);
        ctx.device.bind_texture(0, texture);
        ctx.device.draw_indexed(0, mesh.index_count());
        self.stats.drawn += 1;
        Ok(())
    }

    fn as_renderable(&mut self) -> Option<&mut dyn RenderablePipe> {
        Some(self)
    }
}

impl RenderablePipe for MeshPipe {
    fn add_renderable(
        &mut self,
        id: RenderableId,
        renderable: &Renderable,
        set: &mut InstructionSet,
        ctx: &mut PipeContext<'_>,
    ) -> RenderResult<()> {
        ctx.renderable_gc.add_renderable(id, renderable.pipe, ctx.now);
        if self.is_batched(renderable) {
            self.add_batched(id, renderable, set, ctx)
        } else {
            self.add_unbatched(id, renderable, set, ctx);
            Ok(())
        }
    }

    fn update_renderable(&mut self, id: RenderableId, renderable: &Renderable, ctx: &mut PipeContext<'_>) {
        if let Some(element) = self.batched.get_mut(&id) {
            element.sync_from(id, renderable);
            if !ctx.batch.update_element(element) {
                log::warn!("Mesh {:?} could not be updated in place", id);
            }
        } else if let Some(mesh) = self.unbatched.get_mut(&id) {
            mesh.element.sync_from(id, renderable);
            mesh.pack(self.round_pixels, &mut self.scratch);
        }
    }

    fn validate_renderable(&mut self, id: RenderableId, renderable: &Renderable, ctx: &mut PipeContext<'_>) -> bool {
        if self.is_batched(renderable) {
            return match self.batched.get_mut(&id) {
                Some(element) => batchable_needs_rebuild(element, renderable, ctx),
                None => true,
            };
        }
        match self.unbatched.get(&id) {
            Some(mesh) => {
                mesh.element.blend_mode != renderable.blend_mode
                    || !ctx.textures.is_valid(mesh.element.texture)
                    || !ctx.textures.is_valid(renderable.texture)
            }
            None => true,
        }
    }

    fn destroy_renderable(&mut self, id: RenderableId, pools: &mut Pools) {
        if let Some(element) = self.batched.remove(&id) {
            pools.put(element);
        }
        self.drop_unbatched(id, pools);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::{BatchPipe, DeviceBatcherAdaptor};
    use crate::config::{GcConfig, RendererConfig};
    use crate::device::{BlendMode, DeviceCommand, RecordingDevice};
    use crate::gc::{GcSystem, RenderableGcSystem, TickerScheduler};
    use crate::pipes::BlendModePipe;
    use crate::scene::{MeshGeometry, Scene};
    use crate::texture::{TextureId, TextureSystem};

    fn grid(columns: usize) -> MeshGeometry {
        let mut positions = Vec::new();
        let mut uvs = Vec::new();
        let mut indices = Vec::new();
        for column in 0..columns {
            let x = column as f32;
            positions.extend_from_slice(&[x, 0.0, x, 1.0]);
            uvs.extend_from_slice(&[0.0, 0.0, 0.0, 1.0]);
            if column > 0 {
                let base = u32::try_from(column * 2).unwrap();
                indices.extend_from_slice(&[base - 2, base, base - 1, base - 1, base, base + 1]);
            }
        }
        MeshGeometry::new(positions, uvs, indices)
    }

    struct Fixture {
        pipe: MeshPipe,
        batch: BatchPipe,
        blend_mode: BlendModePipe,
        pools: Pools,
        textures: TextureSystem,
        renderable_gc: RenderableGcSystem,
        gc: GcSystem,
        texture: TextureId,
    }

    impl Fixture {
        fn new() -> Self {
            let config = RendererConfig::default();
            let mut scheduler = TickerScheduler::new();
            let gc_config = GcConfig {
                max_unused_time_ms: 1000,
                ..GcConfig::default()
            };
            let mut gc = GcSystem::new(gc_config, &mut scheduler);
            let release = ReleaseQueue::new();
            let mut textures = TextureSystem::new(&mut gc, release.clone());
            let texture = textures.create(8, 8);
            let mut pipe = MeshPipe::new();
            pipe.init(PipeInit {
                id: PipeId(5),
                gc: &mut gc,
                release: &release,
                config: &config,
            })
            .unwrap();
            Self {
                pipe,
                batch: BatchPipe::new(&config, Box::new(DeviceBatcherAdaptor::new()), release),
                blend_mode: BlendModePipe::new(),
                pools: Pools::new(),
                textures,
                renderable_gc: RenderableGcSystem::new(config.renderable_gc, &mut scheduler),
                gc,
                texture,
            }
        }

        fn add(&mut self, id: RenderableId, renderable: &Renderable, set: &mut InstructionSet) {
            let mut ctx = PipeContext {
                batch: &mut self.batch,
                blend_mode: &mut self.blend_mode,
                pools: &mut self.pools,
                textures: &self.textures,
                renderable_gc: &mut self.renderable_gc,
                now: 0,
            };
            self.pipe.add_renderable(id, renderable, set, &mut ctx).unwrap();
        }

        fn execute(&mut self, set: &InstructionSet, device: &mut RecordingDevice, now: u64) {
            let tick = set.tick_handle();
            let mut ctx = ExecuteContext {
                device,
                textures: &mut self.textures,
                set_id: set.id(),
                set_tick: &tick,
                now,
            };
            for instruction in set {
                if instruction.pipe == PipeId(5) {
                    self.pipe.execute(instruction, &mut ctx).unwrap();
                }
            }
        }
    }

    #[test]
    fn test_small_mesh_is_batched() {
        let mut fixture = Fixture::new();
        let mut scene = Scene::new();
        let id = scene.create_renderable(Renderable::mesh(fixture.texture, grid(4)));
        let mut set = InstructionSet::new();
        fixture.add(id, &scene.renderable(id).unwrap().clone(), &mut set);
        fixture.batch.build_end(&mut set);

        assert_eq!(set.len(), 1);
        assert_eq!(set.get(0).map(|i| i.pipe), Some(PipeId::BATCH));
        assert_eq!(fixture.pipe.unbatched_count(), 0);
    }

    #[test]
    fn test_large_mesh_drawn_unbatched() {
        let mut fixture = Fixture::new();
        let mut scene = Scene::new();
        let id = scene.create_renderable(Renderable::mesh(fixture.texture, grid(60)).with_blend_mode(BlendMode::Add));
        let mut set = InstructionSet::new();
        fixture.add(id, &scene.renderable(id).unwrap().clone(), &mut set);
        fixture.batch.build_end(&mut set);

        let payloads: Vec<_> = set.iter().map(|i| i.payload).collect();
        assert_eq!(
            payloads,
            vec![
                InstructionPayload::BlendMode(BlendMode::Add),
                InstructionPayload::Renderable(id)
            ]
        );

        let mut device = RecordingDevice::new();
        fixture.execute(&set, &mut device, 0);
        fixture.execute(&set, &mut device, 10);
        assert_eq!(fixture.pipe.stats().drawn, 2);
        assert_eq!(fixture.pipe.stats().uploads, 1);
        assert!(fixture.pipe.is_resident(id));
        assert!(device.commands().contains(&DeviceCommand::BindShader(ShaderId::MESH)));
        assert!(device
            .commands()
            .contains(&DeviceCommand::DrawIndexed { start: 0, count: 59 * 6 }));
    }

    #[test]
    fn test_update_reuploads_changed_geometry() {
        let mut fixture = Fixture::new();
        let mut scene = Scene::new();
        let id = scene.create_renderable(Renderable::mesh(fixture.texture, grid(60)));
        let mut set = InstructionSet::new();
        fixture.add(id, &scene.renderable(id).unwrap().clone(), &mut set);
        let mut device = RecordingDevice::new();
        fixture.execute(&set, &mut device, 0);

        let moved = scene.renderable(id).unwrap().clone().with_position(3.0, 4.0);
        let mut ctx = PipeContext {
            batch: &mut fixture.batch,
            blend_mode: &mut fixture.blend_mode,
            pools: &mut fixture.pools,
            textures: &fixture.textures,
            renderable_gc: &mut fixture.renderable_gc,
            now: 0,
        };
        assert!(!fixture.pipe.validate_renderable(id, &moved, &mut ctx));
        fixture.pipe.update_renderable(id, &moved, &mut ctx);
        fixture.pipe.update_renderable(id, &moved, &mut ctx);
        fixture.execute(&set, &mut device, 10);
        assert_eq!(fixture.pipe.stats().uploads, 2);
    }

    #[test]
    fn test_idle_geometry_collected() {
        let mut fixture = Fixture::new();
        let mut scene = Scene::new();
        let id = scene.create_renderable(Renderable::mesh(fixture.texture, grid(60)));
        let mut set = InstructionSet::new();
        fixture.add(id, &scene.renderable(id).unwrap().clone(), &mut set);
        let mut device = RecordingDevice::new();
        fixture.execute(&set, &mut device, 0);
        set.mark_traversed(1);

        fixture.gc.run(500, 1);
        assert!(fixture.pipe.is_resident(id));
        fixture.gc.run(1600, 2);
        assert!(!fixture.pipe.is_resident(id));

        fixture.execute(&set, &mut device, 1700);
        assert!(fixture.pipe.is_resident(id));
        assert_eq!(fixture.pipe.stats().uploads, 2);
    }

    #[test]
    fn test_missing_texture_skips_draw() {
        let mut fixture = Fixture::new();
        let pending = fixture.textures.create_pending(8, 8);
        let mut scene = Scene::new();
        let id = scene.create_renderable(Renderable::mesh(pending, grid(60)));
        let mut set = InstructionSet::new();
        fixture.add(id, &scene.renderable(id).unwrap().clone(), &mut set);
        let mut device = RecordingDevice::new();
        fixture.execute(&set, &mut device, 0);

        assert_eq!(device.draw_calls(), 0);
        assert_eq!(fixture.pipe.stats().skipped, 1);
    }

    #[test]
    fn test_destroy_releases_geometry() {
        let mut fixture = Fixture::new();
        let mut scene = Scene::new();
        let id = scene.create_renderable(Renderable::mesh(fixture.texture, grid(60)));
        let mut set = InstructionSet::new();
        fixture.add(id, &scene.renderable(id).unwrap().clone(), &mut set);
        let mut device = RecordingDevice::new();
        fixture.execute(&set, &mut device, 0);

        fixture.pipe.destroy_renderable(id, &mut fixture.pools);
        assert!(!fixture.pipe.is_resident(id));
        assert_eq!(fixture.pipe.unbatched_count(), 0);
    }
}
