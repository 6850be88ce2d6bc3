// # Memory Management
//
// The paged system-memory allocator that underlies the scheduler and the I/O
// subsystem: power-of-two virtual-memory pages handed out from OS-level
// allocations with per-bucket free caches.

pub mod paged;
mod virt;

pub use paged::{local_page_pool, MemoryPage, PagedPool, PagedPoolConfig, PagedPoolStats};
