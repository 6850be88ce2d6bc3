// # Platform Virtual Memory
//
// Thin cfg-split layer over the OS page allocator. Allocations are
// commit+reserve in one step; sizes at or above the huge-page threshold are
// attempted with a large-page hint first and fall back to normal pages.

/// CPU/GPU access rights requested for an allocation.
#[derive(Debug, Clone, Copy)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

/// Size at which the huge-page hint kicks in (2 MiB on every platform we
/// currently target).
pub const HUGE_PAGE_THRESHOLD: u64 = 2 * 1024 * 1024;

/// Allocate `size` bytes of page-aligned virtual memory. Returns the base
/// pointer and the actually reserved size, or `None` when the OS refuses.
pub fn allocate(size: u64, protection: Protection, zero: bool) -> Option<(*mut u8, u64)> {
    let _ = zero; // both backends hand out zeroed pages
    platform::allocate(size, protection)
}

/// Release a region previously returned by [`allocate`].
pub fn release(base: *mut u8, size: u64) {
    platform::release(base, size)
}

/// Revoke all access to a released-but-cached region so stale use traps.
pub fn protect_none(base: *mut u8, size: u64) {
    platform::protect_none(base, size)
}

/// Restore access rights on a cached region before it is handed out again.
pub fn protect(base: *mut u8, size: u64, protection: Protection) {
    platform::protect(base, size, protection)
}

#[cfg(unix)]
mod platform {
    use super::{Protection, HUGE_PAGE_THRESHOLD};

    fn prot_flags(protection: Protection) -> libc::c_int {
        let mut prot = 0;
        if protection.read {
            prot |= libc::PROT_READ;
        }
        if protection.write {
            prot |= libc::PROT_WRITE;
        }
        if protection.execute {
            prot |= libc::PROT_EXEC;
        }
        prot
    }

    pub fn allocate(size: u64, protection: Protection) -> Option<(*mut u8, u64)> {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
        let alloc_size = size.div_ceil(page_size) * page_size;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                alloc_size as usize,
                prot_flags(protection),
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return None;
        }

        // large-page hint, best effort; the mapping works either way
        #[cfg(target_os = "linux")]
        if alloc_size >= HUGE_PAGE_THRESHOLD {
            unsafe {
                libc::madvise(ptr, alloc_size as usize, libc::MADV_HUGEPAGE);
            }
        }

        Some((ptr as *mut u8, alloc_size))
    }

    pub fn release(base: *mut u8, size: u64) {
        unsafe {
            libc::munmap(base as *mut libc::c_void, size as usize);
        }
    }

    pub fn protect_none(base: *mut u8, size: u64) {
        unsafe {
            libc::mprotect(base as *mut libc::c_void, size as usize, libc::PROT_NONE);
        }
    }

    pub fn protect(base: *mut u8, size: u64, protection: Protection) {
        unsafe {
            libc::mprotect(
                base as *mut libc::c_void,
                size as usize,
                prot_flags(protection),
            );
        }
    }
}

#[cfg(windows)]
mod platform {
    use super::{Protection, HUGE_PAGE_THRESHOLD};
    use windows_sys::Win32::System::Memory::{
        GetLargePageMinimum, VirtualAlloc, VirtualFree, VirtualProtect, MEM_COMMIT,
        MEM_LARGE_PAGES, MEM_RELEASE, MEM_RESERVE, PAGE_EXECUTE_READ, PAGE_EXECUTE_READWRITE,
        PAGE_NOACCESS, PAGE_READONLY, PAGE_READWRITE,
    };

    fn protect_flags(protection: Protection) -> u32 {
        match (protection.execute, protection.write) {
            (true, true) => PAGE_EXECUTE_READWRITE,
            (true, false) => PAGE_EXECUTE_READ,
            (false, true) => PAGE_READWRITE,
            (false, false) => PAGE_READONLY,
        }
    }

    pub fn allocate(size: u64, protection: Protection) -> Option<(*mut u8, u64)> {
        const SMALL_PAGE: u64 = 4096;
        let large_page = unsafe { GetLargePageMinimum() } as u64;
        let use_large =
            large_page != 0 && size >= large_page.max(HUGE_PAGE_THRESHOLD);

        let flags = protect_flags(protection);

        if use_large {
            let alloc_size = size.div_ceil(large_page) * large_page;
            let ptr = unsafe {
                VirtualAlloc(
                    std::ptr::null(),
                    alloc_size as usize,
                    MEM_COMMIT | MEM_RESERVE | MEM_LARGE_PAGES,
                    flags,
                )
            };
            if !ptr.is_null() {
                return Some((ptr as *mut u8, alloc_size));
            }
            // fall through to normal pages
        }

        let alloc_size = size.div_ceil(SMALL_PAGE) * SMALL_PAGE;
        let ptr = unsafe {
            VirtualAlloc(
                std::ptr::null(),
                alloc_size as usize,
                MEM_COMMIT | MEM_RESERVE,
                flags,
            )
        };
        if ptr.is_null() {
            None
        } else {
            Some((ptr as *mut u8, alloc_size))
        }
    }

    pub fn release(base: *mut u8, _size: u64) {
        unsafe {
            VirtualFree(base as _, 0, MEM_RELEASE);
        }
    }

    pub fn protect_none(base: *mut u8, size: u64) {
        let mut old = 0u32;
        unsafe {
            VirtualProtect(base as _, size as usize, PAGE_NOACCESS, &mut old);
        }
    }

    pub fn protect(base: *mut u8, size: u64, protection: Protection) {
        let mut old = 0u32;
        unsafe {
            VirtualProtect(base as _, size as usize, protect_flags(protection), &mut old);
        }
    }
}
