// # Task Builder
//
// Fluent construction of task entries: instancing, concurrency caps,
// scheduler selection and signal wiring. Submitting returns the completion
// signal, which trips once the last instance has finished.

use crate::task::entry::{TaskContext, TaskEntry};
use crate::task::scheduler::{main_scheduler, TaskScheduler};
use crate::task::signal::Signal;
use std::sync::Arc;

/// Builds and submits a task.
///
/// A task with wait-for dependencies is scheduled from the completion
/// callback of its (possibly merged) wait signal; everything else goes to
/// the scheduler immediately.
pub struct TaskBuilder {
    name: &'static str,
    scheduler: Arc<dyn TaskScheduler>,
    group: u64,
    instances: u32,
    concurrency: u32,
    completion: Signal,
    wait_for: Vec<Signal>,
    submitted: bool,
}

impl TaskBuilder {
    /// Build a floating task: it gets a fresh dispatch group when scheduled.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            scheduler: main_scheduler(),
            group: 0,
            instances: 1,
            concurrency: u32::MAX,
            completion: Signal::create(1, name),
            wait_for: Vec::new(),
            submitted: false,
        }
    }

    /// Build a task inside the dispatch group of an existing task context so
    /// related work drains together.
    pub fn in_context(ctx: &TaskContext, name: &'static str) -> Self {
        let mut builder = Self::new(name);
        builder.group = ctx.group;
        builder
    }

    //--

    /// Run the task on a specific scheduler instead of the main pool.
    pub fn scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    /// Number of times to run the task body (instancing).
    pub fn instances(mut self, count: u32) -> Self {
        debug_assert!(count >= 1, "instance count can't be zero");
        self.instances = count.max(1);
        self
    }

    /// Maximum number of instances that may run at once. Counts yielded
    /// instances as running.
    pub fn concurrency(mut self, concurrency: u32) -> Self {
        debug_assert!(concurrency >= 1, "concurrency should be at least 1");
        self.concurrency = concurrency.max(1);
        self
    }

    //--

    /// Hold the task until `signal` finishes.
    pub fn wait_for(mut self, signal: Signal) -> Self {
        debug_assert!(!signal.is_empty(), "waiting on the empty signal");
        debug_assert!(
            !self.wait_for.contains(&signal),
            "signal can't be added twice to the wait list"
        );
        if !signal.is_empty() {
            self.wait_for.push(signal);
        }
        self
    }

    /// Hold the task until all `signals` finish.
    pub fn wait_for_all(mut self, signals: &[Signal]) -> Self {
        for signal in signals {
            self = self.wait_for(*signal);
        }
        self
    }

    /// Trip `signal` once the task finishes.
    pub fn notify(self, signal: Signal) -> Self {
        debug_assert!(!signal.is_empty(), "notifying the empty signal");
        self.completion.register_completion_signal(signal, 1);
        self
    }

    /// Trip all `signals` once the task finishes.
    pub fn notify_all(mut self, signals: &[Signal]) -> Self {
        for signal in signals {
            self = self.notify(*signal);
        }
        self
    }

    //--

    /// Bind a plain body and submit. Returns the completion signal.
    pub fn run(self, func: impl Fn(&mut TaskContext) + Send + Sync + 'static) -> Signal {
        self.submit(Box::new(move |ctx, _index| func(ctx)))
    }

    /// Bind a per-instance body (receives the instance index) and submit.
    /// Returns the completion signal.
    pub fn run_indexed(
        self,
        func: impl Fn(&mut TaskContext, u32) + Send + Sync + 'static,
    ) -> Signal {
        self.submit(Box::new(func))
    }

    fn submit(mut self, func: crate::task::entry::TaskBody) -> Signal {
        self.submitted = true;

        let completion = self.completion;
        let entry = TaskEntry::new(
            self.name,
            self.group,
            self.instances,
            self.concurrency,
            completion,
            func,
        );

        if self.wait_for.is_empty() {
            // no conditions; off it goes
            self.scheduler.schedule_task(entry);
        } else {
            let wait_signal = if self.wait_for.len() == 1 {
                self.wait_for[0]
            } else {
                Signal::merge(&self.wait_for, 0)
            };

            let scheduler = self.scheduler.clone();
            wait_signal.register_completion_callback(move || {
                scheduler.schedule_task(entry);
            });
        }

        completion
    }
}

impl Drop for TaskBuilder {
    fn drop(&mut self) {
        // a builder abandoned without a body still has to release its signal
        if !self.submitted {
            self.completion.trip();
        }
    }
}
