//! Garbage-collection contract for tracked resources

use crate::foundation::time::TimeMs;
use crate::GcError;

/// How a tracked resource's usage is observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GcResourceKind {
    /// Usage is reported by explicit touches
    #[default]
    Resource,
    /// Usage is inferred from the traversal tick of the owning instruction set
    Renderable,
}

/// Bookkeeping the collectors store on each resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GcData {
    last_used: Option<TimeMs>,
    slot: Option<usize>,
    kind: GcResourceKind,
}

impl GcData {
    /// Create bookkeeping for an untracked resource of `kind`
    pub const fn new(kind: GcResourceKind) -> Self {
        Self {
            last_used: None,
            slot: None,
            kind,
        }
    }

    /// Last time the resource was touched
    pub const fn last_used(&self) -> Option<TimeMs> {
        self.last_used
    }

    /// Index in the collector's tracked array
    pub const fn slot(&self) -> Option<usize> {
        self.slot
    }

    /// Usage model
    pub const fn kind(&self) -> GcResourceKind {
        self.kind
    }

    /// Whether the array collector currently tracks the resource
    pub const fn is_tracked(&self) -> bool {
        self.slot.is_some()
    }

    /// Milliseconds since the last touch; zero if never touched
    pub fn idle_time(&self, now: TimeMs) -> TimeMs {
        self.last_used.map_or(0, |last| now.saturating_sub(last))
    }

    pub(crate) fn touch(&mut self, now: TimeMs) {
        self.last_used = Some(now);
    }

    pub(crate) fn track(&mut self, slot: usize, kind: GcResourceKind, now: TimeMs) {
        self.slot = Some(slot);
        self.kind = kind;
        self.last_used = Some(now);
    }

    pub(crate) fn set_slot(&mut self, slot: usize) {
        self.slot = Some(slot);
    }

    pub(crate) fn set_kind(&mut self, kind: GcResourceKind) {
        self.kind = kind;
    }

    /// Forget all tracking state
    pub fn clear(&mut self) {
        self.last_used = None;
        self.slot = None;
    }
}

/// A resource whose GPU-side data can be reclaimed when idle
pub trait GcResource {
    /// Collector bookkeeping
    fn gc_data(&self) -> &GcData;

    /// Mutable collector bookkeeping
    fn gc_data_mut(&mut self) -> &mut GcData;

    /// Release GPU-side data; the resource stays usable and may re-upload
    fn unload(&mut self) -> Result<(), GcError>;

    /// Opt-out switch; `false` keeps the resource regardless of idle time
    fn auto_garbage_collect(&self) -> bool {
        true
    }

    /// Called whenever the collector refreshes the resource's last use
    fn on_touch(&mut self, _now: TimeMs) {}

    /// Traversal tick of the instruction set that draws this resource
    fn last_traversed_tick(&self) -> Option<u64> {
        None
    }

    /// Name used in diagnostics
    fn label(&self) -> &str {
        "resource"
    }
}

/// Record a use of `resource` at `now`
pub(crate) fn touch_resource(resource: &mut dyn GcResource, now: TimeMs) {
    resource.gc_data_mut().touch(now);
    resource.on_touch(now);
}
