// # File Views
//
// A view is a seek/read window over an absolute sub-range of a reader. The
// offset is absolute, in file space; reads clamp to the view's range and a
// seek outside the range simply makes reads return zero.

use crate::file::range::FileRange;
use crate::file::FileFlags;
use bytes::Bytes;

/// Readable view of a file with a distinct read position.
///
/// The interface is inherently slow; it is meant for small reads (headers)
/// where memory mapping is not worth it.
pub trait FileView: Send {
    /// Debug information about the source, usually path and offset.
    fn info(&self) -> &str;

    fn flags(&self) -> FileFlags;

    /// Absolute range of the parent file this view covers.
    fn range(&self) -> FileRange;

    /// Size of the viewed range.
    fn size(&self) -> u64 {
        self.range().size()
    }

    //--

    /// Current absolute offset.
    fn offset(&self) -> u64;

    /// Set the absolute offset. Seeking outside the view's range is allowed
    /// and makes subsequent reads return 0 bytes.
    fn seek(&mut self, offset: u64);

    /// Read into `dest`, returning the number of bytes actually read and
    /// advancing the offset. Zero means end-of-range or an offset outside
    /// the range.
    fn read_sync(&mut self, dest: &mut [u8]) -> u64;
}

/// View over a shared byte buffer; keeps the buffer alive.
pub fn view_from_bytes(buffer: Bytes, info: String) -> Box<dyn FileView> {
    let range = FileRange::new(0, buffer.len() as u64);
    Box::new(crate::file::memory_reader::MemoryFileView::new(
        FileFlags::MEMORY_BACKED,
        info,
        range,
        buffer,
    ))
}

/// View over static memory.
pub fn view_from_static(data: &'static [u8], info: String) -> Box<dyn FileView> {
    let range = FileRange::new(0, data.len() as u64);
    Box::new(crate::file::memory_reader::MemoryFileView::new(
        FileFlags::MEMORY_BACKED | FileFlags::DETACHED,
        info,
        range,
        Bytes::from_static(data),
    ))
}
