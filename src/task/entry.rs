// # Task Entries and Contexts
//
// A `TaskEntry` is the live description of a scheduled task: how many
// instances to run, how many may run at once, the body closure and the
// completion signal. Entries are shared between the queue and the workers
// via `Arc`; the last finished instance trips the completion signal and the
// final `Arc` drop releases the entry.

use crate::sync::{Event, EventType};
use crate::task::signal::Signal;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Task body: called once per instance with the per-invocation context and
/// the instance index. Instances of one task may run concurrently on
/// different workers.
pub type TaskBody = Box<dyn Fn(&mut TaskContext, u32) + Send + Sync>;

// ============================================================================
// Yielder and context
// ============================================================================

/// Worker-local capability that parks the current task on a signal,
/// releasing the worker (by blocking it on an event) until the signal trips.
pub trait TaskYielder: Sync {
    fn yield_and_wait(&self, signal: Signal);
}

/// Per-invocation task state. Lives only for one task invocation.
pub struct TaskContext<'a> {
    /// Group the task belongs to; child tasks built from this context are
    /// dispatched together with it.
    pub group: u64,

    /// Completion signal of the running task. [`Signal::steal`] moves it out
    /// so the caller takes over the final trip.
    pub(crate) completion_signal: Signal,

    yielder: &'a dyn TaskYielder,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(group: u64, completion_signal: Signal, yielder: &'a dyn TaskYielder) -> Self {
        Self {
            group,
            completion_signal,
            yielder,
        }
    }

    #[inline]
    pub fn yielder(&self) -> &dyn TaskYielder {
        self.yielder
    }
}

// ============================================================================
// Ambient context
// ============================================================================

/// Yielder for threads that are not scheduler workers: pairs the signal with
/// a one-shot event and blocks the calling thread.
struct AmbientYielder;

impl TaskYielder for AmbientYielder {
    fn yield_and_wait(&self, signal: Signal) {
        let event = Arc::new(Event::new(EventType::ManualReset));
        let trigger = event.clone();
        signal.register_completion_callback(move || {
            trigger.trigger();
        });
        event.wait();
    }
}

static AMBIENT_YIELDER: AmbientYielder = AmbientYielder;

/// Context usable from any thread that is not running inside the task
/// system (the main thread, tests, I/O callbacks).
pub fn ambient_context() -> TaskContext<'static> {
    TaskContext::new(0, Signal::empty(), &AMBIENT_YIELDER)
}

// ============================================================================
// Task entry
// ============================================================================

/// Live state of a scheduled task, shared by the queue and the workers.
pub struct TaskEntry {
    pub(crate) name: &'static str,

    /// Dispatch group; zero until the scheduler assigns one.
    pub(crate) group: AtomicU64,

    /// How many times to run the body.
    pub(crate) instances: u32,

    /// Upper bound on simultaneously running instances.
    pub(crate) concurrency: u32,

    pub(crate) func: TaskBody,

    /// Raw id of the signal to trip when the last instance finishes; workers
    /// write back here after each invocation so a steal sticks.
    pub(crate) signal: AtomicU64,

    /// Instances handed to workers so far.
    pub(crate) scheduled: AtomicU32,

    /// Instances currently running.
    pub(crate) active: AtomicU32,

    /// Counts down to zero to trip the completion signal.
    pub(crate) remaining: AtomicU32,
}

impl TaskEntry {
    pub(crate) fn new(
        name: &'static str,
        group: u64,
        instances: u32,
        concurrency: u32,
        signal: Signal,
        func: TaskBody,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            group: AtomicU64::new(group),
            instances,
            concurrency,
            func,
            signal: AtomicU64::new(signal.raw()),
            scheduled: AtomicU32::new(0),
            active: AtomicU32::new(0),
            remaining: AtomicU32::new(instances),
        })
    }

    #[inline]
    pub(crate) fn completion_signal(&self) -> Signal {
        Signal::from_raw(self.signal.load(Ordering::Acquire))
    }
}

// ============================================================================
// Tests
// ============================================================================
