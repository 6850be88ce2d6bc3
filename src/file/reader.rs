// # Abstract File Reader
//
// A reader delivers async reads by default; synchronous access goes through
// views, pointer access through mappings. Derived objects keep the reader
// alive, so handing `Arc<dyn FileReader>` around is always safe.

use crate::error::Result;
use crate::file::mapping::FileMapping;
use crate::file::range::FileRange;
use crate::file::view::FileView;
use crate::file::{BufferPool, FileFlags};
use crate::task::entry::TaskContext;
use crate::task::signal::Signal;
use bytes::Bytes;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Async read completion callback. Invoked exactly once with the number of
/// bytes actually read, or a negative value on error. May run on any thread,
/// including the I/O thread; keep it short.
pub type ReadCallback = Box<dyn FnOnce(i64) + Send + 'static>;

/// An abstract file with read access.
pub trait FileReader: Send + Sync {
    /// Size of the file in bytes. Immutable for the reader's lifetime.
    fn size(&self) -> u64;

    /// Debug information about the source of this file, usually the path.
    fn info(&self) -> &str;

    fn flags(&self) -> FileFlags;

    /// The full absolute range of the file.
    fn full_range(&self) -> FileRange {
        FileRange::new(0, self.size())
    }

    //--

    /// Start an async read of the file content; `callback` fires exactly
    /// once with the byte count (truncated at end of file) or a negative
    /// value on error. The reader takes no ownership of `dest`.
    ///
    /// # Safety
    ///
    /// `dest` must point to at least `range.size()` writable bytes and the
    /// caller must keep it valid, and not read or write it, until the
    /// callback fires.
    unsafe fn read_async(&self, range: FileRange, dest: *mut u8, callback: ReadCallback);

    /// Async read that yields the current task until the read completes.
    /// Returns the byte count, or `None` on read error.
    ///
    /// # Safety
    ///
    /// `dest` must point to at least `range.size()` writable bytes that
    /// nothing else touches until this returns.
    unsafe fn read_async_yield(
        &self,
        ctx: &TaskContext,
        range: FileRange,
        dest: *mut u8,
    ) -> Option<u64> {
        let signal = Signal::create(1, "AsyncIO");

        let result = Arc::new(AtomicI64::new(0));
        let slot = result.clone();
        // Safety: forwarded contract; the wait below keeps dest pinned until
        // the callback has fired
        unsafe {
            self.read_async(
                range,
                dest,
                Box::new(move |actual_read| {
                    slot.store(actual_read, Ordering::Release);
                    signal.trip();
                }),
            );
        }

        signal.wait_with_yield(ctx);

        let actual_read = result.load(Ordering::Acquire);
        if actual_read < 0 {
            None
        } else {
            Some(actual_read as u64)
        }
    }

    //--

    /// Load part of the file into a buffer allocated from `pool`. May use
    /// memory mapping internally on mmap-capable backends.
    fn load_to_buffer(&self, pool: &dyn BufferPool, range: FileRange) -> Result<Bytes>;

    /// Create a seek/read view over an absolute sub-range of the file.
    /// Returns `None` for an empty or out-of-file range.
    fn create_view(self: Arc<Self>, range: FileRange) -> Option<Box<dyn FileView>>;

    /// Map part of the file for direct memory access. On backends without
    /// real mappings this wraps the existing bytes. Should be considered a
    /// blocking call.
    fn create_mapping(self: Arc<Self>, range: FileRange) -> Option<Arc<dyn FileMapping>>;
}
