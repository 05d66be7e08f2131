//! # Render Pipeline
//!
//! The render-instruction pipeline of a 2D renderer. A tree of drawables is
//! flattened into a linear [`InstructionSet`](instructions::InstructionSet)
//! per render group, compatible adjacent draws are merged into shared
//! batches, and GPU-side resources idle past a configurable period are
//! reclaimed.
//!
//! ## Features
//!
//! - **Render pipes**: per-drawable-kind strategies behind capability traits
//! - **Batching**: texture-slot aware geometry packing with in-place updates
//! - **Instruction replay**: unchanged scenes replay last frame's instructions
//! - **Garbage collection**: idle GPU resources and per-drawable caches are
//!   unloaded on a schedule
//! - **Headless device**: [`RecordingDevice`](device::RecordingDevice) records
//!   every GPU command for tests and tooling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use render_pipeline::prelude::*;
//!
//! fn main() -> Result<(), RenderError> {
//!     let mut scheduler = TickerScheduler::new();
//!     let clock = ManualClock::new();
//!     let mut renderer = Renderer::with_default_pipes(
//!         RendererConfig::default(),
//!         &mut scheduler,
//!         Box::new(clock.clone()),
//!     )?;
//!
//!     let texture = renderer.textures_mut().create(64, 64);
//!     let mut scene = Scene::new();
//!     let group = scene.create_render_group();
//!     let sprite = scene.create_renderable(Renderable::sprite(texture, 64.0, 64.0));
//!     scene.add_child(group, SceneNode::Renderable(sprite));
//!
//!     let mut device = RecordingDevice::new();
//!     clock.advance(16);
//!     scheduler.update(clock.now_ms());
//!     let stats = renderer.render(&mut scene, &mut device);
//!     assert_eq!(stats.failed_groups, 0);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod foundation;
pub mod config;
pub mod device;
pub mod texture;
pub mod instructions;
pub mod pipes;
pub mod batcher;
pub mod gc;
pub mod scene;

mod error;
mod renderer;

#[cfg(test)]
mod tests;

pub use error::{GcError, RenderError, RenderResult};
pub use renderer::{FrameStats, Renderer};

/// Common imports for pipeline users
pub mod prelude {
    pub use crate::{
        RenderError, RenderResult, Renderer, FrameStats,
        config::{Config, ConfigError, RendererConfig},
        device::{GpuDevice, RecordingDevice, DeviceCommand},
        foundation::time::{Clock, ManualClock, SystemClock, TimeMs},
        gc::{Scheduler, TickerScheduler, GcSystem, RenderableGcSystem},
        pipes::{RenderPipe, RenderablePipe, StatefulPipe, EffectPipe},
        scene::{BlendMode, Effect, Renderable, Scene, SceneNode},
        texture::TextureId,
    };
}
