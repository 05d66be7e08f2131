//! Fixed-function render state shared by instructions and the device

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// How a draw is composited onto the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BlendMode {
    /// Source-over with premultiplied alpha
    #[default]
    Normal,
    /// Additive
    Add,
    /// Multiply
    Multiply,
    /// Screen
    Screen,
    /// Overwrite the target
    None,
}

bitflags! {
    /// Colour channels the device is allowed to write
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorMask: u8 {
        /// Red channel
        const RED = 1 << 0;
        /// Green channel
        const GREEN = 1 << 1;
        /// Blue channel
        const BLUE = 1 << 2;
        /// Alpha channel
        const ALPHA = 1 << 3;
    }
}

impl Default for ColorMask {
    fn default() -> Self {
        Self::all()
    }
}

/// Identifies a shader program owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderId(pub u32);

impl ShaderId {
    /// Multi-texture batch shader used by the default batcher
    pub const BATCH: Self = Self(0);
    /// Single-texture shader used for unbatched meshes
    pub const MESH: Self = Self(1);
}

/// Identifies a post-processing filter owned by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterId(pub u32);
