// # Memory-Backed Readers
//
// A reader fully backed by process memory: async reads complete inline,
// loads and mappings are zero-copy slices of the shared buffer.

use crate::error::{CoreError, Result};
use crate::file::mapping::FileMapping;
use crate::file::range::FileRange;
use crate::file::reader::{FileReader, ReadCallback};
use crate::file::view::FileView;
use crate::file::{BufferPool, FileFlags};
use bytes::Bytes;
use std::sync::Arc;

// ============================================================================
// Reader
// ============================================================================

/// File reader over a shared byte buffer.
pub struct MemoryFileReader {
    buffer: Bytes,
    flags: FileFlags,
    info: String,
}

impl MemoryFileReader {
    pub fn new(buffer: Bytes, flags: FileFlags, info: String) -> Self {
        Self {
            buffer,
            flags: flags | FileFlags::MEMORY_BACKED | FileFlags::BUFFERED,
            info,
        }
    }
}

impl FileReader for MemoryFileReader {
    fn size(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn info(&self) -> &str {
        &self.info
    }

    fn flags(&self) -> FileFlags {
        self.flags
    }

    unsafe fn read_async(&self, range: FileRange, dest: *mut u8, callback: ReadCallback) {
        let read_size = self.full_range().calculate_read_size(range);
        if read_size > 0 {
            // Safety: dest holds range.size() writable bytes per the trait
            // contract; read_size never exceeds it
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.buffer.as_ptr().add(range.start() as usize),
                    dest,
                    read_size as usize,
                );
            }
        }
        callback(read_size as i64);
    }

    fn load_to_buffer(&self, _pool: &dyn BufferPool, range: FileRange) -> Result<Bytes> {
        if !self.full_range().contains(range) {
            return Err(CoreError::InvalidRange(format!(
                "load range {} outside file {}",
                range,
                self.full_range()
            )));
        }

        // zero-copy sub-buffer of the backing memory
        Ok(self
            .buffer
            .slice(range.start() as usize..range.end() as usize))
    }

    fn create_view(self: Arc<Self>, range: FileRange) -> Option<Box<dyn FileView>> {
        if range.is_empty() || !self.full_range().contains(range) {
            return None;
        }

        Some(Box::new(MemoryFileView::new(
            self.flags,
            self.info.clone(),
            range,
            self.buffer.clone(),
        )))
    }

    fn create_mapping(self: Arc<Self>, range: FileRange) -> Option<Arc<dyn FileMapping>> {
        if !self.full_range().contains(range) {
            return None;
        }

        Some(Arc::new(BufferMapping {
            info: self.info.clone(),
            data: self
                .buffer
                .slice(range.start() as usize..range.end() as usize),
        }))
    }
}

/// Reader over a shared buffer; the buffer stays alive as long as the reader
/// or anything derived from it.
pub fn reader_from_bytes(buffer: Bytes, info: String) -> Arc<dyn FileReader> {
    Arc::new(MemoryFileReader::new(buffer, FileFlags::NONE, info))
}

/// Reader over static memory.
pub fn reader_from_static(data: &'static [u8], info: String) -> Arc<dyn FileReader> {
    Arc::new(MemoryFileReader::new(
        Bytes::from_static(data),
        FileFlags::DETACHED,
        info,
    ))
}

// ============================================================================
// View
// ============================================================================

/// Memory-backed readable view.
pub struct MemoryFileView {
    flags: FileFlags,
    info: String,
    range: FileRange,
    offset: u64,
    buffer: Bytes,
}

impl MemoryFileView {
    pub(crate) fn new(flags: FileFlags, info: String, range: FileRange, buffer: Bytes) -> Self {
        Self {
            flags: flags | FileFlags::MEMORY_BACKED,
            info,
            offset: range.start(),
            range,
            buffer,
        }
    }
}

impl FileView for MemoryFileView {
    fn info(&self) -> &str {
        &self.info
    }

    fn flags(&self) -> FileFlags {
        self.flags
    }

    fn range(&self) -> FileRange {
        self.range
    }

    fn offset(&self) -> u64 {
        self.offset
    }

    fn seek(&mut self, offset: u64) {
        self.offset = offset;
    }

    fn read_sync(&mut self, dest: &mut [u8]) -> u64 {
        if self.offset < self.range.start() || self.offset >= self.range.end() {
            return 0;
        }

        let available = self.range.end() - self.offset;
        let copy_size = (dest.len() as u64).min(available);

        let start = self.offset as usize;
        dest[..copy_size as usize].copy_from_slice(&self.buffer[start..start + copy_size as usize]);
        self.offset += copy_size;

        copy_size
    }
}

// ============================================================================
// Mapping
// ============================================================================

/// Mapping that wraps an existing buffer slice.
struct BufferMapping {
    info: String,
    data: Bytes,
}

impl FileMapping for BufferMapping {
    fn info(&self) -> &str {
        &self.info
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn as_bytes(&self) -> Bytes {
        self.data.clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::file::heap_pool;
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

    const KOTA: &[u8] = b"Ala ma kota";

    fn kota_reader() -> Arc<dyn FileReader> {
        reader_from_static(KOTA, "kota".into())
    }

    #[test]
    fn test_reader_reports_size_and_flags() {
        let reader = kota_reader();
        assert_eq!(reader.size(), 11);
        assert!(reader.flags().contains(FileFlags::MEMORY_BACKED));
        assert!(reader.flags().contains(FileFlags::BUFFERED));
    }

    #[test]
    fn test_async_read_completes_inline_with_content() {
        let reader = kota_reader();

        let mut buffer = [0u8; 64];
        let done = Arc::new(AtomicBool::new(false));
        let read = Arc::new(AtomicI64::new(-100));

        let d = done.clone();
        let r = read.clone();
        unsafe {
            reader.read_async(
                FileRange::new(0, 11),
                buffer.as_mut_ptr(),
                Box::new(move |actual| {
                    r.store(actual, Ordering::SeqCst);
                    d.store(true, Ordering::SeqCst);
                }),
            );
        }

        assert!(done.load(Ordering::SeqCst));
        assert_eq!(read.load(Ordering::SeqCst), 11);
        assert_eq!(&buffer[..11], KOTA);
    }

    #[test]
    fn test_async_read_truncates_at_end() {
        let reader = kota_reader();

        let mut buffer = [0u8; 64];
        let read = Arc::new(AtomicI64::new(-100));
        let r = read.clone();
        unsafe {
            reader.read_async(
                FileRange::new(8, 40),
                buffer.as_mut_ptr(),
                Box::new(move |actual| r.store(actual, Ordering::SeqCst)),
            );
        }
        assert_eq!(read.load(Ordering::SeqCst), 3);
        assert_eq!(&buffer[..3], b"ota");
    }

    #[test]
    fn test_async_read_past_end_reads_zero() {
        let reader = kota_reader();

        let mut buffer = [0u8; 8];
        let read = Arc::new(AtomicI64::new(-100));
        let r = read.clone();
        unsafe {
            reader.read_async(
                FileRange::new(20, 28),
                buffer.as_mut_ptr(),
                Box::new(move |actual| r.store(actual, Ordering::SeqCst)),
            );
        }
        assert_eq!(read.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_load_full_range_round_trips() {
        let reader = kota_reader();
        let loaded = reader
            .load_to_buffer(heap_pool(), reader.full_range())
            .unwrap();
        assert_eq!(&loaded[..], KOTA);
    }

    #[test]
    fn test_load_outside_file_is_invalid_range() {
        let reader = kota_reader();
        assert!(matches!(
            reader.load_to_buffer(heap_pool(), FileRange::new(4, 40)),
            Err(CoreError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_view_reads_and_advances() {
        let reader = kota_reader();
        let mut view = reader.clone().create_view(reader.full_range()).unwrap();
        assert_eq!(view.size(), 11);

        let mut buffer = [0u8; 64];
        assert_eq!(view.read_sync(&mut buffer), 11);
        assert_eq!(&buffer[..11], KOTA);

        // exhausted
        assert_eq!(view.read_sync(&mut buffer), 0);
    }

    #[test]
    fn test_view_seek_is_absolute() {
        let reader = kota_reader();
        let mut view = reader
            .clone()
            .create_view(FileRange::new(4, 11))
            .unwrap();

        // initial offset is the range start
        assert_eq!(view.offset(), 4);

        view.seek(8);
        let mut buffer = [0u8; 8];
        assert_eq!(view.read_sync(&mut buffer), 3);
        assert_eq!(&buffer[..3], b"ota");
    }

    #[test]
    fn test_view_seek_outside_range_reads_zero() {
        let reader = kota_reader();
        let mut view = reader
            .clone()
            .create_view(FileRange::new(4, 8))
            .unwrap();

        view.seek(0);
        let mut buffer = [0u8; 8];
        assert_eq!(view.read_sync(&mut buffer), 0);

        view.seek(100);
        assert_eq!(view.read_sync(&mut buffer), 0);
    }

    #[test]
    fn test_empty_range_yields_no_view() {
        let reader = kota_reader();
        assert!(reader.clone().create_view(FileRange::new(4, 4)).is_none());
    }

    #[test]
    fn test_mapping_exposes_content() {
        let reader = kota_reader();
        let mapping = reader.clone().create_mapping(reader.full_range()).unwrap();
        assert_eq!(mapping.size(), 11);
        assert_eq!(mapping.data(), KOTA);
        assert_eq!(&mapping.as_bytes()[..], KOTA);
    }

    #[test]
    fn test_mapping_of_sub_range() {
        let reader = kota_reader();
        let mapping = reader.clone().create_mapping(FileRange::new(4, 6)).unwrap();
        assert_eq!(mapping.data(), b"ma");
    }
}
