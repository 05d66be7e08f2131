//! # Garbage Collection
//!
//! Reclaims GPU-side resources and per-drawable pipe data that have gone
//! unused for longer than a configurable period.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler ──repeat(frequency)──> ready flag
//!                                      │
//! Renderer::render ... post_render ────┴──> GcSystem::run(now, tick)
//!                                            ├── GcManagedHash sweeps (by priority)
//!                                            └── tracked resource array sweep
//!                                       RenderableGcSystem::run(now, tick, scene)
//!                                            └── pipe.destroy_renderable(...)
//! ```
//!
//! The collectors never own what they track. [`GcSystem`] keeps `Weak`
//! references and stores each resource's array slot inside the resource's
//! own [`GcData`], which makes removal O(1). Sweeps only run from the
//! renderer's post-render hook, never in the middle of building or
//! executing instructions.

mod gc_system;
mod managed_hash;
mod renderable_gc;
mod resource;
mod scheduler;

pub use gc_system::{GcStats, GcSweepReport, GcSystem};
pub use managed_hash::{GcManagedHash, HashSweepReport, ManagedHashSweep, SweepParams};
pub use renderable_gc::{RenderableGcStats, RenderableGcSystem};
pub use resource::{GcData, GcResource, GcResourceKind};
pub use scheduler::{ScheduleHandle, Scheduler, TickerScheduler};
