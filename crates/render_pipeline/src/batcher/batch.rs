//! Batches: contiguous index ranges drawn with one state and texture set

use crate::device::BlendMode;
use crate::foundation::pool::Poolable;
use crate::texture::TextureId;

/// What executing a batch instruction has to bind first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchAction {
    /// First batch of a run: bind geometry and shader, then draw
    #[default]
    StartBatch,
    /// Continuation: geometry and shader are still bound
    RenderBatch,
}

/// Texture slot table of one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchTextureArray {
    ids: Vec<TextureId>,
}

impl BatchTextureArray {
    /// Slot holding `texture`
    pub fn slot_of(&self, texture: TextureId) -> Option<u32> {
        self.ids
            .iter()
            .position(|id| *id == texture)
            .and_then(|slot| u32::try_from(slot).ok())
    }

    /// Whether `texture` already has a slot
    pub fn contains(&self, texture: TextureId) -> bool {
        self.ids.contains(&texture)
    }

    /// Assign the next slot to `texture`
    pub fn push(&mut self, texture: TextureId) -> u32 {
        self.ids.push(texture);
        u32::try_from(self.ids.len() - 1).unwrap_or(u32::MAX)
    }

    /// Number of used slots
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether no slot is used
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Textures in slot order
    pub fn as_slice(&self) -> &[TextureId] {
        &self.ids
    }

    /// Free every slot
    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

/// A finished or in-progress batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    /// What to bind before drawing
    pub action: BatchAction,
    /// Compositing mode shared by every element
    pub blend_mode: BlendMode,
    /// Textures referenced by the batch's vertices
    pub textures: BatchTextureArray,
    /// First index
    pub start: u32,
    /// Index count
    pub size: u32,
    /// Elements packed into the batch
    pub element_count: u32,
}

impl Poolable for Batch {
    fn reset(&mut self) {
        self.action = BatchAction::StartBatch;
        self.blend_mode = BlendMode::Normal;
        self.textures.clear();
        self.start = 0;
        self.size = 0;
        self.element_count = 0;
    }
}
