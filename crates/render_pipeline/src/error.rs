//! Error types shared by the pipeline

use crate::config::ConfigError;
use crate::device::DeviceError;
use crate::texture::TextureId;

/// Result alias used throughout the pipeline
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors raised while configuring, building or executing instructions
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Two pipes were registered under the same name
    #[error("Render pipe name collision: '{0}' is registered more than once")]
    PipeNameCollision(String),

    /// A drawable or effect named a pipe that is not registered
    #[error("Unknown render pipe: '{0}'")]
    UnknownPipe(String),

    /// A pipe was asked for a capability it does not implement
    #[error("Render pipe '{pipe}' does not support {capability}")]
    MissingCapability {
        /// Pipe name
        pipe: String,
        /// Capability that was requested
        capability: &'static str,
    },

    /// A drawable named a batcher that is not registered
    #[error("Unknown batcher: '{0}'")]
    UnknownBatcher(String),

    /// Two batchers were registered under the same name
    #[error("Batcher name collision: '{0}' is registered more than once")]
    BatcherNameCollision(String),

    /// A batch instruction points at a batch that no longer exists
    #[error("Instruction references missing batch {batch} of batcher {batcher}")]
    MissingBatch {
        /// Batcher index within the instruction set
        batcher: u16,
        /// Batch index within the batcher
        batch: u32,
    },

    /// A pipe failed while executing an instruction
    #[error("Render pipe '{pipe}' failed to execute: {reason}")]
    Execute {
        /// Pipe name
        pipe: &'static str,
        /// Failure description
        reason: String,
    },

    /// A texture could not be made resident for drawing
    #[error("Texture {0:?} is not available for drawing")]
    TextureUnavailable(TextureId),

    /// Device failure
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised by garbage-collected resources
#[derive(Debug, thiserror::Error)]
pub enum GcError {
    /// A resource's unload hook failed
    #[error("Failed to unload resource '{resource}': {reason}")]
    UnloadFailed {
        /// Resource description
        resource: String,
        /// Failure description
        reason: String,
    },

    /// A resource could not be registered while borrowed elsewhere
    #[error("Resource '{resource}' is borrowed and cannot be tracked")]
    ResourceBusy {
        /// Resource type
        resource: &'static str,
    },
}
