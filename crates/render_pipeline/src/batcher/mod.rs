//! # Batching
//!
//! Merges adjacent compatible drawables into shared draw calls.
//!
//! ## Pipeline
//!
//! ```text
//! Renderable ──sync_from──> BatchableElement
//!                               │ BatchPipe::add_to_batch
//!                               v
//!                  Batcher (per set, per name)
//!                  ├── BatchGeometry: packed BatchVertex / u32 indices
//!                  └── Batch: blend mode, texture slots, index range
//!                               │ Batch instruction
//!                               v
//!                  BatcherAdaptor::start / execute ──> GpuDevice
//! ```
//!
//! A batch closes when the blend mode changes, when a new texture would
//! exceed `max_batchable_textures`, or when another pipe needs to insert a
//! non-batch instruction.

mod adaptor;
mod batch;
mod batch_pipe;
#[allow(clippy::module_inception)]
mod batcher;
mod element;
mod packing;

pub use adaptor::{BatchOutcome, BatcherAdaptor, DeviceBatcherAdaptor};
pub use batch::{Batch, BatchAction, BatchTextureArray};
pub use batch_pipe::{BatchPipe, BatchStats};
pub use batcher::{BatchGeometry, Batcher, BatcherDescriptor};
pub use element::{BatchLocation, BatchableElement};
pub use packing::{pack_color, pack_texture_id_and_flags, BatchVertex, VertexFlags, QUAD_INDICES};

pub(crate) use packing::{write_indices, write_vertices};
