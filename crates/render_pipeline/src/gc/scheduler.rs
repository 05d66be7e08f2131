//! Repeating callbacks driven by the host's frame loop

use slotmap::{new_key_type, SlotMap};

use crate::foundation::time::TimeMs;

new_key_type! {
    /// Handle returned by [`Scheduler::repeat`]
    pub struct ScheduleHandle;
}

/// Scheduler consumed by the garbage collectors
///
/// Callbacks must be cheap: the collectors only raise a flag from them and
/// do the actual work in the renderer's post-render hook.
pub trait Scheduler {
    /// Invoke `callback` every `interval_ms`
    fn repeat(&mut self, interval_ms: TimeMs, callback: Box<dyn FnMut()>) -> ScheduleHandle;

    /// Stop a repeating callback; unknown handles are ignored
    fn cancel(&mut self, handle: ScheduleHandle);
}

struct RepeatingTask {
    interval: TimeMs,
    next_due: TimeMs,
    callback: Box<dyn FnMut()>,
}

/// Host-driven [`Scheduler`]
///
/// Call [`TickerScheduler::update`] once per frame. A task that is due fires
/// once per update even if several intervals elapsed since the last one.
#[derive(Default)]
pub struct TickerScheduler {
    tasks: SlotMap<ScheduleHandle, RepeatingTask>,
    now: TimeMs,
}

impl std::fmt::Debug for TickerScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TickerScheduler")
            .field("tasks", &self.tasks.len())
            .field("now", &self.now)
            .finish()
    }
}

impl TickerScheduler {
    /// Create a scheduler at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire every task that is due at `now`; returns how many fired
    pub fn update(&mut self, now: TimeMs) -> usize {
        self.now = now;
        let mut fired = 0;
        for task in self.tasks.values_mut() {
            if now >= task.next_due {
                (task.callback)();
                task.next_due = now + task.interval;
                fired += 1;
            }
        }
        fired
    }

    /// Number of registered tasks
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Scheduler for TickerScheduler {
    fn repeat(&mut self, interval_ms: TimeMs, callback: Box<dyn FnMut()>) -> ScheduleHandle {
        let interval = interval_ms.max(1);
        self.tasks.insert(RepeatingTask {
            interval,
            next_due: self.now + interval,
            callback,
        })
    }

    fn cancel(&mut self, handle: ScheduleHandle) {
        self.tasks.remove(handle);
    }
}
