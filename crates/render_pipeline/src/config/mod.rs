//! # Configuration System
//!
//! Renderer options and the file loading shared by every config type.
//!
//! ## Configuration Categories
//!
//! - **GC Config**: resource-level garbage collection (`gc`)
//! - **Renderable GC Config**: per-drawable cache collection (`renderable_gc`)
//! - **Batcher Config**: texture slots, geometry pre-allocation, mesh batching
//!
//! Every field has a default, so a config file only needs the keys it
//! changes:
//!
//! ```toml
//! round_pixels = true
//!
//! [gc]
//! max_unused_time_ms = 5000
//! ```

pub use serde::{Serialize, Deserialize};

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(ConfigError::Io)?;

        // Format follows the file extension
        if path.ends_with(".toml") {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.to_string()));
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value is outside its accepted range
    #[error("Invalid configuration value for '{key}': {reason}")]
    Invalid {
        /// Offending key
        key: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Resource-level garbage collection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// Whether sweeps are scheduled at all
    pub active: bool,
    /// Idle time after which an auto-collected resource is unloaded
    pub max_unused_time_ms: u64,
    /// Interval between sweeps
    pub frequency_ms: u64,
    /// Tombstone count at which a managed hash is rebuilt during a sweep
    pub hash_rebuild_threshold: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            active: true,
            max_unused_time_ms: 60_000,
            frequency_ms: 30_000,
            hash_rebuild_threshold: 10_000,
        }
    }
}

/// Per-drawable cache collection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderableGcConfig {
    /// Whether sweeps are scheduled at all
    pub active: bool,
    /// Time a drawable may go unrendered before its pipe data is destroyed
    pub max_unused_time_ms: u64,
    /// Interval between sweeps
    pub frequency_ms: u64,
}

impl Default for RenderableGcConfig {
    fn default() -> Self {
        Self {
            active: true,
            max_unused_time_ms: 60_000,
            frequency_ms: 30_000,
        }
    }
}

/// Batching settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatcherConfig {
    /// Texture slots available to a single batch
    pub max_batchable_textures: usize,
    /// Vertices reserved up front by each batcher
    pub initial_vertex_capacity: usize,
    /// Indices reserved up front by each batcher
    pub initial_index_capacity: usize,
    /// Meshes with more vertices than this are drawn unbatched
    pub mesh_batch_vertex_limit: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batchable_textures: 16,
            initial_vertex_capacity: 4096,
            initial_index_capacity: 6144,
            mesh_batch_vertex_limit: 100,
        }
    }
}

/// Top-level renderer configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Resource-level garbage collection
    pub gc: GcConfig,
    /// Per-drawable cache collection
    pub renderable_gc: RenderableGcConfig,
    /// Batching
    pub batcher: BatcherConfig,
    /// Snap every vertex to whole pixels, in addition to per-drawable flags
    pub round_pixels: bool,
}

impl Config for RendererConfig {}

impl RendererConfig {
    /// Largest texture slot that fits the packed vertex attribute
    pub const MAX_TEXTURE_SLOTS: usize = 0xFFFF;

    /// Builder-style GC toggle
    pub const fn with_gc_active(mut self, active: bool) -> Self {
        self.gc.active = active;
        self
    }

    /// Builder-style texture slot ceiling
    pub const fn with_max_batchable_textures(mut self, max: usize) -> Self {
        self.batcher.max_batchable_textures = max;
        self
    }

    /// Builder-style GC idle threshold and cadence
    pub const fn with_gc_timing(mut self, max_unused_time_ms: u64, frequency_ms: u64) -> Self {
        self.gc.max_unused_time_ms = max_unused_time_ms;
        self.gc.frequency_ms = frequency_ms;
        self
    }

    /// Builder-style renderable GC idle threshold and cadence
    pub const fn with_renderable_gc_timing(mut self, max_unused_time_ms: u64, frequency_ms: u64) -> Self {
        self.renderable_gc.max_unused_time_ms = max_unused_time_ms;
        self.renderable_gc.frequency_ms = frequency_ms;
        self
    }

    /// Reject values the pipeline cannot honour
    pub fn validate(&self) -> Result<(), ConfigError> {
        let slots = self.batcher.max_batchable_textures;
        if slots == 0 || slots > Self::MAX_TEXTURE_SLOTS {
            return Err(ConfigError::Invalid {
                key: "batcher.max_batchable_textures",
                reason: format!("{slots} is outside 1..={}", Self::MAX_TEXTURE_SLOTS),
            });
        }
        if self.gc.active && self.gc.frequency_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "gc.frequency_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.renderable_gc.active && self.renderable_gc.frequency_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "renderable_gc.frequency_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
