//! Foundation module - Core utilities and types
//!
//! This module provides fundamental utilities used throughout the pipeline:
//! - Object pooling for per-frame allocations
//! - Time sources for garbage collection
//! - Logging utilities

pub mod pool;
pub mod time;
pub mod logging;
