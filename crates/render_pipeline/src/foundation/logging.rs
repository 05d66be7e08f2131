//! Logging utilities and structured logging support

use std::sync::Once;

pub use log::{debug, info, warn, error, trace};

static INIT: Once = Once::new();

/// Initialize the logging system
///
/// Honours `RUST_LOG`; safe to call more than once.
pub fn init() {
    INIT.call_once(|| {
        let _ = env_logger::Builder::from_default_env().try_init();
    });
}

/// Initialize the logging system with a fallback filter
///
/// `RUST_LOG` still wins when set. Used by hosts that want pipeline
/// diagnostics (e.g. `"render_pipeline=debug"`) without requiring the
/// environment variable.
pub fn init_with_filter(filter: &str) {
    INIT.call_once(|| {
        let env = env_logger::Env::default().default_filter_or(filter);
        let _ = env_logger::Builder::from_env(env).try_init();
    });
}
