// # Paged System-Memory Pool
//
// Hands out power-of-two virtual-memory pages with per-bucket free caches.
// Buckets are keyed by size class (`log2(size) - log2(min)`); each bucket
// keeps its released pages in FILO order so the most recently used page, the
// one most likely still warm in cache, is handed out first. A live-pages map
// lets `free_page` recover the bucket from the page index alone.
//
// Locks are per bucket plus one over the live map, and none of them is ever
// held across an OS call.

use crate::error::{CoreError, Result};
use crate::memory::virt;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

// ============================================================================
// Configuration
// ============================================================================

/// Setup for a [`PagedPool`].
#[derive(Debug, Clone)]
pub struct PagedPoolConfig {
    /// Smallest page the pool will hand out. Must be a power of two.
    pub minimum_page_size: u64,

    /// Largest page the pool will hand out. Must be a power of two.
    pub maximum_page_size: u64,

    /// Revoke access to cached pages so stale pointers trap.
    pub protect_released_pages: bool,

    /// Guarantee zeroed content on every allocation, not just fresh ones.
    pub zero_initialize_pages: bool,

    /// Upper bound on the total bytes parked in the free caches; pages
    /// released beyond the budget go straight back to the OS.
    pub retention_budget: u64,

    pub cpu_read: bool,
    pub cpu_write: bool,
    pub cpu_execute: bool,
    pub gpu_read: bool,
    pub gpu_write: bool,
}

impl Default for PagedPoolConfig {
    fn default() -> Self {
        Self {
            minimum_page_size: 4096,
            maximum_page_size: 64 << 20,
            protect_released_pages: false,
            zero_initialize_pages: false,
            retention_budget: 256 << 20,
            cpu_read: true,
            cpu_write: true,
            cpu_execute: false,
            gpu_read: false,
            gpu_write: false,
        }
    }
}

// ============================================================================
// Memory Page
// ============================================================================

/// A page handed out by a [`PagedPool`]. The index identifies the page back
/// to the pool; the pointers delimit the usable region.
#[derive(Debug, Clone, Copy)]
pub struct MemoryPage {
    index: u32,
    base: *mut u8,
    end: *mut u8,
}

impl MemoryPage {
    /// Pool-assigned identity of this page.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.end as u64 - self.base as u64
    }

    /// View the page as a mutable byte slice.
    ///
    /// # Safety
    ///
    /// The page must not have been freed and no other slice over it may be
    /// live.
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.base, self.size() as usize)
    }
}

// Safety: a page is a plain region descriptor; synchronization of the bytes
// behind it is the caller's responsibility.
unsafe impl Send for MemoryPage {}
unsafe impl Sync for MemoryPage {}

// ============================================================================
// Paged Pool
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct PageInfo {
    base: *mut u8,
    size: u64,
    bucket: u8,
}

// Safety: PageInfo travels between the live map and the bucket caches under
// the pool's locks.
unsafe impl Send for PageInfo {}
unsafe impl Sync for PageInfo {}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PagedPoolStats {
    pub live_bytes: u64,
    pub cached_bytes: u64,
    pub cached_pages: u64,
}

/// Page pool over direct OS allocations (mmap / VirtualAlloc).
pub struct PagedPool {
    name: &'static str,
    config: PagedPoolConfig,
    min_log2: u32,

    next_page_index: AtomicU32,
    live_pages: DashMap<u32, PageInfo>,

    buckets: Vec<Mutex<Vec<PageInfo>>>,

    live_bytes: AtomicU64,
    cached_bytes: AtomicU64,
    cached_pages: AtomicU64,
}

impl PagedPool {
    pub fn new(name: &'static str, config: PagedPoolConfig) -> Self {
        assert!(
            config.minimum_page_size.is_power_of_two()
                && config.maximum_page_size.is_power_of_two(),
            "page size bounds must be powers of two"
        );
        assert!(config.minimum_page_size <= config.maximum_page_size);

        let min_log2 = config.minimum_page_size.trailing_zeros();
        let max_log2 = config.maximum_page_size.trailing_zeros();
        let bucket_count = (max_log2 - min_log2 + 1) as usize;

        let mut buckets = Vec::with_capacity(bucket_count);
        for _ in 0..bucket_count {
            buckets.push(Mutex::new(Vec::new()));
        }

        Self {
            name,
            config,
            min_log2,
            next_page_index: AtomicU32::new(0),
            live_pages: DashMap::with_capacity(1024),
            buckets,
            live_bytes: AtomicU64::new(0),
            cached_bytes: AtomicU64::new(0),
            cached_pages: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn minimum_page_size(&self) -> u64 {
        self.config.minimum_page_size
    }

    #[inline]
    pub fn maximum_page_size(&self) -> u64 {
        self.config.maximum_page_size
    }

    pub fn stats(&self) -> PagedPoolStats {
        PagedPoolStats {
            live_bytes: self.live_bytes.load(Ordering::Relaxed),
            cached_bytes: self.cached_bytes.load(Ordering::Relaxed),
            cached_pages: self.cached_pages.load(Ordering::Relaxed),
        }
    }

    /// Allocate a page of exactly `size` bytes. `size` must be a power of two
    /// within the configured bounds.
    pub fn allocate_page(&self, size: u64) -> Result<MemoryPage> {
        if size == 0 || !size.is_power_of_two() {
            return Err(CoreError::ContractViolation(format!(
                "page size {} is not a power of two",
                size
            )));
        }
        if size < self.config.minimum_page_size || size > self.config.maximum_page_size {
            return Err(CoreError::ContractViolation(format!(
                "page size {} outside pool bounds [{}, {}]",
                size, self.config.minimum_page_size, self.config.maximum_page_size
            )));
        }

        let info = self.allocate_raw_page(size)?;
        let index = self.register_raw_page(info);

        Ok(MemoryPage {
            index,
            base: info.base,
            end: unsafe { info.base.add(info.size as usize) },
        })
    }

    /// Return a page to the pool. Freeing a page this pool did not hand out
    /// is a contract violation.
    pub fn free_page(&self, page: MemoryPage) -> Result<()> {
        let info = self.unregister_raw_page(page)?;
        self.free_raw_page(info);
        Ok(())
    }

    //--

    fn bucket_index(&self, size: u64) -> usize {
        (size.trailing_zeros() - self.min_log2) as usize
    }

    fn protection(&self) -> virt::Protection {
        virt::Protection {
            read: self.config.cpu_read,
            write: self.config.cpu_write,
            execute: self.config.cpu_execute,
        }
    }

    fn allocate_raw_page(&self, size: u64) -> Result<PageInfo> {
        let bucket_index = self.bucket_index(size);

        // try the free cache first; this path never talks to the OS
        let cached = {
            let mut bucket = self.buckets[bucket_index].lock();
            bucket.pop()
        };
        if let Some(info) = cached {
            debug_assert_eq!(info.bucket as usize, bucket_index);
            self.cached_pages.fetch_sub(1, Ordering::Relaxed);
            self.cached_bytes.fetch_sub(info.size, Ordering::Relaxed);
            self.live_bytes.fetch_add(info.size, Ordering::Relaxed);

            if self.config.protect_released_pages {
                virt::protect(info.base, info.size, self.protection());
            }
            if self.config.zero_initialize_pages {
                unsafe {
                    std::ptr::write_bytes(info.base, 0, info.size as usize);
                }
            }
            return Ok(info);
        }

        let (base, allocated) = virt::allocate(
            size,
            self.protection(),
            self.config.zero_initialize_pages,
        )
        .ok_or_else(|| {
            CoreError::OutOfMemory(format!(
                "pool '{}' failed to allocate a {} byte page",
                self.name, size
            ))
        })?;

        self.live_bytes.fetch_add(allocated, Ordering::Relaxed);

        Ok(PageInfo {
            base,
            size: allocated,
            bucket: bucket_index as u8,
        })
    }

    fn free_raw_page(&self, info: PageInfo) {
        self.live_bytes.fetch_sub(info.size, Ordering::Relaxed);

        // cache within the retention budget, release beyond it
        let cached_now = self.cached_bytes.load(Ordering::Relaxed);
        if cached_now + info.size <= self.config.retention_budget {
            if self.config.protect_released_pages {
                virt::protect_none(info.base, info.size);
            }

            self.cached_bytes.fetch_add(info.size, Ordering::Relaxed);
            self.cached_pages.fetch_add(1, Ordering::Relaxed);

            let mut bucket = self.buckets[info.bucket as usize].lock();
            bucket.push(info);
        } else {
            virt::release(info.base, info.size);
        }
    }

    fn register_raw_page(&self, info: PageInfo) -> u32 {
        let index = self.next_page_index.fetch_add(1, Ordering::Relaxed);
        self.live_pages.insert(index, info);
        index
    }

    fn unregister_raw_page(&self, page: MemoryPage) -> Result<PageInfo> {
        let (_, info) = self.live_pages.remove(&page.index).ok_or_else(|| {
            CoreError::ContractViolation(format!(
                "freeing page {} unknown to pool '{}'",
                page.index, self.name
            ))
        })?;

        debug_assert_eq!(info.base, page.base, "page index and base pointer disagree");
        Ok(info)
    }
}

impl Drop for PagedPool {
    fn drop(&mut self) {
        for bucket in &self.buckets {
            let mut pages = bucket.lock();
            for info in pages.drain(..) {
                virt::release(info.base, info.size);
            }
        }

        let leaked = self.live_pages.len();
        if leaked > 0 {
            tracing::warn!(
                pool = self.name,
                pages = leaked,
                "paged pool dropped with live pages outstanding"
            );
        }
    }
}

// ============================================================================
// Process-wide default pool
// ============================================================================

static LOCAL_PAGE_POOL: Lazy<PagedPool> =
    Lazy::new(|| PagedPool::new("LocalPagePool", PagedPoolConfig::default()));

/// Default process-wide page pool.
pub fn local_page_pool() -> &'static PagedPool {
    &LOCAL_PAGE_POOL
}

// ============================================================================
// Tests
// ============================================================================
