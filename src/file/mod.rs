// # File Reading Subsystem
//
// Abstract readers delivering asynchronous reads, synchronous seek/read
// views, memory-mapped regions and whole-buffer loads. Two canonical
// backends: memory-backed (tests, mock depots) and OS-file-backed (a single
// dedicated I/O thread services async requests). Derived views and mappings
// keep their parent reader alive.

pub mod async_dispatcher;
pub mod mapping;
pub mod memory_fs;
pub mod memory_reader;
pub mod os_fs;
pub mod os_reader;
pub mod range;
pub mod reader;
pub mod view;
pub mod watcher;

pub use mapping::FileMapping;
pub use memory_fs::{FileWriteMode, MemoryFileSystem, MemoryFileWriter};
pub use memory_reader::{reader_from_bytes, reader_from_static};
pub use os_fs::{
    load_file_to_buffer, open_for_reading, save_file_from_buffer, FileReadMode,
};
pub use range::FileRange;
pub use reader::{FileReader, ReadCallback};
pub use view::{view_from_bytes, view_from_static, FileView};
pub use watcher::{DirectoryWatcher, WatcherEvent, WatcherEventType, WatcherListener};

use bytes::BytesMut;
use once_cell::sync::Lazy;

// ============================================================================
// File flags
// ============================================================================

/// Property bits of a reader, view or mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileFlags(u32);

impl FileFlags {
    pub const NONE: FileFlags = FileFlags(0);
    /// Content lives entirely in process memory.
    pub const MEMORY_BACKED: FileFlags = FileFlags(1 << 0);
    /// Reads go through a buffer rather than raw device access.
    pub const BUFFERED: FileFlags = FileFlags(1 << 1);
    /// The backend can hand out memory mappings of the content.
    pub const MEMORY_MAPPED: FileFlags = FileFlags(1 << 2);
    /// The object does not own the memory it points at.
    pub const DETACHED: FileFlags = FileFlags(1 << 3);

    #[inline]
    pub fn contains(&self, other: FileFlags) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for FileFlags {
    type Output = FileFlags;

    fn bitor(self, rhs: FileFlags) -> FileFlags {
        FileFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for FileFlags {
    fn bitor_assign(&mut self, rhs: FileFlags) {
        self.0 |= rhs.0;
    }
}

// ============================================================================
// Buffer pool collaborator
// ============================================================================

/// Capability to allocate raw byte buffers, drawn from the containers layer.
/// Load operations take the pool so callers control where bulk data lands.
pub trait BufferPool: Send + Sync {
    /// Allocate a zeroed buffer of `size` bytes; `None` means out of memory.
    fn allocate(&self, size: usize) -> Option<BytesMut>;
}

/// Plain heap-backed pool.
pub struct HeapBufferPool;

impl BufferPool for HeapBufferPool {
    fn allocate(&self, size: usize) -> Option<BytesMut> {
        Some(BytesMut::zeroed(size))
    }
}

static HEAP_POOL: Lazy<HeapBufferPool> = Lazy::new(|| HeapBufferPool);

/// Process-default buffer pool.
pub fn heap_pool() -> &'static HeapBufferPool {
    &HEAP_POOL
}
