// # Container Primitives
//
// Specialized containers used by the scheduler core.

pub mod group_queue;

pub use group_queue::{GroupQueue, PeekResult};
