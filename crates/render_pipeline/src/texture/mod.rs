//! # Texture System
//!
//! Tracks texture sources and keeps their GPU copies resident on demand.
//! Sources are described by the host (decoding is external); residency is
//! created lazily the first time a source is bound and cached in a
//! [`GcManagedHash`], so textures that stop being drawn are unloaded by
//! garbage collection and transparently re-created when drawn again.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::device::{GpuDevice, GpuHandle, ReleaseQueue, TextureHandle};
use crate::foundation::time::TimeMs;
use crate::gc::{GcData, GcManagedHash, GcResource, GcResourceKind, GcSystem};
use crate::{GcError, RenderError, RenderResult};

/// Identifies a texture source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

/// Lifecycle of a texture source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureState {
    /// Registered, pixels not available yet
    Pending,
    /// Pixels available; may be made resident
    Ready,
    /// Loading failed; never drawn
    Failed,
    /// Destroyed by the host; drawables using it must rebuild
    Destroyed,
}

/// A texture source as described by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureSource {
    /// Source id
    pub id: TextureId,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Lifecycle state
    pub state: TextureState,
}

/// Resident GPU copy of a texture source
#[derive(Debug)]
pub struct GpuTexture {
    handle: Option<TextureHandle>,
    gc: GcData,
    release: ReleaseQueue,
}

impl GpuTexture {
    fn new(handle: TextureHandle, release: ReleaseQueue) -> Self {
        Self {
            handle: Some(handle),
            gc: GcData::default(),
            release,
        }
    }

    /// Device handle, if still resident
    pub const fn handle(&self) -> Option<TextureHandle> {
        self.handle
    }
}

impl GcResource for GpuTexture {
    fn gc_data(&self) -> &GcData {
        &self.gc
    }

    fn gc_data_mut(&mut self) -> &mut GcData {
        &mut self.gc
    }

    fn unload(&mut self) -> Result<(), GcError> {
        if let Some(handle) = self.handle.take() {
            self.release.push(GpuHandle::Texture(handle));
        }
        Ok(())
    }

    fn label(&self) -> &str {
        "texture"
    }
}

impl Drop for GpuTexture {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.release.push(GpuHandle::Texture(handle));
        }
    }
}

/// Texture sources plus their GC-managed GPU residency
#[derive(Debug)]
pub struct TextureSystem {
    sources: HashMap<TextureId, TextureSource>,
    resident: Rc<RefCell<GcManagedHash<TextureId, GpuTexture>>>,
    release: ReleaseQueue,
    next_id: u32,
    white: TextureId,
}

impl TextureSystem {
    /// GC sweep priority of the residency cache
    pub const GC_PRIORITY: i32 = 0;

    /// Create the system and register its residency cache with `gc`
    pub fn new(gc: &mut GcSystem, release: ReleaseQueue) -> Self {
        let resident = GcManagedHash::new("texture-residency", GcResourceKind::Resource)
            .register(gc, Self::GC_PRIORITY);
        let mut system = Self {
            sources: HashMap::new(),
            resident,
            release,
            next_id: 0,
            white: TextureId(0),
        };
        system.white = system.create(1, 1);
        system
    }

    /// 1x1 white texture for untextured drawables
    pub const fn white(&self) -> TextureId {
        self.white
    }

    fn insert(&mut self, width: u32, height: u32, state: TextureState) -> TextureId {
        let id = TextureId(self.next_id);
        self.next_id += 1;
        self.sources.insert(id, TextureSource { id, width, height, state });
        id
    }

    /// Register a texture whose pixels are available
    pub fn create(&mut self, width: u32, height: u32) -> TextureId {
        self.insert(width, height, TextureState::Ready)
    }

    /// Register a texture that is still loading
    pub fn create_pending(&mut self, width: u32, height: u32) -> TextureId {
        self.insert(width, height, TextureState::Pending)
    }

    /// Mark a pending texture as loaded
    pub fn mark_ready(&mut self, id: TextureId) {
        self.set_state(id, TextureState::Ready);
    }

    /// Mark a pending texture as failed
    pub fn mark_failed(&mut self, id: TextureId) {
        self.set_state(id, TextureState::Failed);
    }

    fn set_state(&mut self, id: TextureId, state: TextureState) {
        match self.sources.get_mut(&id) {
            Some(source) if source.state != TextureState::Destroyed => source.state = state,
            Some(_) => log::debug!("Ignoring state change of destroyed texture {:?}", id),
            None => log::warn!("Unknown texture {:?}", id),
        }
    }

    /// Destroy a texture and release its GPU copy
    pub fn destroy(&mut self, id: TextureId) {
        if let Some(source) = self.sources.get_mut(&id) {
            source.state = TextureState::Destroyed;
        }
        self.resident.borrow_mut().destroy(&id);
    }

    /// Source description
    pub fn source(&self, id: TextureId) -> Option<&TextureSource> {
        self.sources.get(&id)
    }

    /// Whether drawables may keep referencing `id`
    pub fn is_valid(&self, id: TextureId) -> bool {
        self.sources
            .get(&id)
            .is_some_and(|source| source.state != TextureState::Destroyed)
    }

    /// Whether `id` currently has a GPU copy
    pub fn is_resident(&self, id: TextureId) -> bool {
        self.resident.borrow().contains_key(&id)
    }

    /// Number of resident textures
    pub fn resident_count(&self) -> usize {
        self.resident.borrow().len()
    }

    /// Make `id` resident if needed and return its device handle
    pub fn bind(&mut self, id: TextureId, device: &mut dyn GpuDevice, now: TimeMs) -> RenderResult<TextureHandle> {
        let source = match self.sources.get(&id) {
            Some(source) if source.state == TextureState::Ready => source,
            _ => return Err(RenderError::TextureUnavailable(id)),
        };

        let mut resident = self.resident.borrow_mut();
        if let Some(handle) = resident.get(&id).and_then(GpuTexture::handle) {
            resident.touch(&id, now);
            return Ok(handle);
        }

        let handle = device.create_texture(id, source.width, source.height)?;
        resident.insert(id, GpuTexture::new(handle, self.release.clone()), now);
        log::trace!("Texture {:?} resident as {:?}", id, handle);
        Ok(handle)
    }
}
