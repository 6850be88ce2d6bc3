// # Task System
//
// Multi-threaded task scheduling with signal-based synchronization: tasks are
// instanced work items dispatched through a grouped priority queue, and
// signals form the dependency graph between them. Worker pools are native
// threads; in-task waits park the worker on a pooled event.

pub mod builder;
pub mod entry;
mod native;
pub mod parallel;
pub mod scheduler;
pub mod signal;

pub use builder::TaskBuilder;
pub use entry::{ambient_context, TaskContext, TaskYielder};
pub use parallel::{parallel_for, parallel_for_each, IndexRange};
pub use scheduler::{
    background_scheduler, init_task_system, main_scheduler, max_task_concurrency,
    shutdown_task_system, TaskScheduler, TaskSystemConfig,
};
pub use signal::Signal;
