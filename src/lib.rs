// EmberCore - Game-engine foundation runtime
//
// The foundation layer of an engine-class runtime: a grouped-priority task
// scheduler with signal-based synchronization, the paged system-memory
// allocator underneath it, and a file-reading subsystem with asynchronous
// reads, seekable views and memory-mapped regions.
//
// The three subsystems are tightly coupled: the scheduler orders work through
// the grouped queue, tasks await I/O through signals, and I/O buffers come
// from the paged allocator.

pub mod containers;
pub mod error;
pub mod file;
pub mod memory;
pub mod sync;
pub mod task;

pub use error::{CoreError, Result};
