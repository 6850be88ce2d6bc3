// # OS-Backed File Reader
//
// Reader over a real file: async reads go through the shared dispatcher
// thread, synchronous views read through a small pool of reopened handles
// (so concurrent views never fight over one file cursor), and files opened
// in memory-mapped mode can hand out mapped regions.

use crate::error::{CoreError, Result};
use crate::file::async_dispatcher::{async_read_dispatcher, read_at_exact};
use crate::file::mapping::FileMapping;
use crate::file::range::FileRange;
use crate::file::reader::{FileReader, ReadCallback};
use crate::file::view::FileView;
use crate::file::{BufferPool, FileFlags};
use bytes::Bytes;
use parking_lot::Mutex;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Sync handles kept for reuse per reader.
const MAX_SYNC_HANDLES: usize = 2;

// ============================================================================
// Reader
// ============================================================================

/// Read-only file backed by the OS filesystem.
pub struct OsFileReader {
    flags: FileFlags,
    info: String,
    size: u64,
    path: PathBuf,

    /// Handle used by the async dispatcher; positional reads only, so it is
    /// safe to share.
    async_file: Arc<File>,

    /// Small free list of reopened handles for synchronous views.
    sync_handles: Mutex<Vec<File>>,

    /// Whole-file mapping object, created when opened in mmap mode.
    #[cfg(windows)]
    mapping_handle: isize,
}

#[cfg(windows)]
unsafe impl Send for OsFileReader {}
#[cfg(windows)]
unsafe impl Sync for OsFileReader {}

impl OsFileReader {
    /// Open `path` for reading. Returns `None` when the file is missing or
    /// cannot be opened.
    pub fn open(path: &Path, memory_mapped: bool) -> Option<Arc<OsFileReader>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(error) => {
                tracing::debug!(path = %path.display(), %error, "open for reading failed");
                return None;
            }
        };

        let size = match file.metadata() {
            Ok(metadata) => metadata.len(),
            Err(error) => {
                tracing::error!(path = %path.display(), %error, "failed to stat file");
                return None;
            }
        };

        let mut flags = FileFlags::BUFFERED;
        if memory_mapped && size > 0 {
            flags |= FileFlags::MEMORY_MAPPED;
        }

        #[cfg(windows)]
        let mapping_handle = if flags.contains(FileFlags::MEMORY_MAPPED) {
            platform::create_whole_file_mapping(&file).unwrap_or(0)
        } else {
            0
        };

        // no mapping object means no mapped access, flag or not
        #[cfg(windows)]
        let flags = if mapping_handle == 0 {
            FileFlags::BUFFERED
        } else {
            flags
        };

        Some(Arc::new(OsFileReader {
            flags,
            info: path.display().to_string(),
            size,
            path: path.to_path_buf(),
            async_file: Arc::new(file),
            sync_handles: Mutex::new(Vec::new()),
            #[cfg(windows)]
            mapping_handle,
        }))
    }

    fn acquire_sync_handle(&self) -> Option<File> {
        if let Some(handle) = self.sync_handles.lock().pop() {
            return Some(handle);
        }

        match File::open(&self.path) {
            Ok(handle) => Some(handle),
            Err(error) => {
                tracing::error!(path = %self.path.display(), %error, "reopening sync handle failed");
                None
            }
        }
    }

    fn release_sync_handle(&self, handle: File) {
        let mut handles = self.sync_handles.lock();
        if handles.len() < MAX_SYNC_HANDLES {
            handles.push(handle);
        }
        // otherwise the handle just closes
    }

    fn raw_map(&self, range: FileRange) -> Option<RawFileMap> {
        if !self.flags.contains(FileFlags::MEMORY_MAPPED) {
            return None;
        }

        #[cfg(unix)]
        {
            platform::map_range(&self.async_file, range)
        }

        #[cfg(windows)]
        {
            platform::map_range(self.mapping_handle, range)
        }

        #[cfg(not(any(unix, windows)))]
        {
            let _ = range;
            None
        }
    }
}

#[cfg(windows)]
impl Drop for OsFileReader {
    fn drop(&mut self) {
        if self.mapping_handle != 0 {
            unsafe {
                windows_sys::Win32::Foundation::CloseHandle(self.mapping_handle as _);
            }
        }
    }
}

impl FileReader for OsFileReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn info(&self) -> &str {
        &self.info
    }

    fn flags(&self) -> FileFlags {
        self.flags
    }

    unsafe fn read_async(&self, range: FileRange, dest: *mut u8, callback: ReadCallback) {
        // Safety: forwarded contract; the dispatcher writes at most
        // range.size() bytes into dest before the callback fires
        unsafe {
            async_read_dispatcher().schedule_async(self.async_file.clone(), range, dest, callback);
        }
    }

    fn load_to_buffer(&self, pool: &dyn BufferPool, range: FileRange) -> Result<Bytes> {
        if !self.full_range().contains(range) {
            return Err(CoreError::InvalidRange(format!(
                "load range {} outside file {}",
                range,
                self.full_range()
            )));
        }

        // mapped path first; cheaper than a read for large ranges
        if let Some(raw) = self.raw_map(range) {
            return Ok(Bytes::copy_from_slice(raw.data()));
        }

        let mut buffer = pool.allocate(range.size() as usize).ok_or_else(|| {
            CoreError::OutOfMemory(format!("load buffer of {} bytes", range.size()))
        })?;

        let read = read_at_exact(&self.async_file, &mut buffer, range.start())?;
        if read != range.size() {
            return Err(CoreError::ReadFailure(format!(
                "read {} of {} bytes from '{}'",
                read,
                range.size(),
                self.info
            )));
        }

        Ok(buffer.freeze())
    }

    fn create_view(self: Arc<Self>, range: FileRange) -> Option<Box<dyn FileView>> {
        if range.is_empty() || !self.full_range().contains(range) {
            return None;
        }

        let handle = self.acquire_sync_handle()?;

        Some(Box::new(DiskFileView {
            flags: self.flags,
            info: self.info.clone(),
            range,
            offset: range.start(),
            handle: Some(handle),
            owner: self,
        }))
    }

    fn create_mapping(self: Arc<Self>, range: FileRange) -> Option<Arc<dyn FileMapping>> {
        if !self.flags.contains(FileFlags::MEMORY_MAPPED) {
            tracing::error!(file = %self.info, "file was not opened in memory-mapped mode");
            return None;
        }
        if range.is_empty() || !self.full_range().contains(range) {
            return None;
        }

        let raw = self.raw_map(range)?;
        Some(Arc::new(OsFileMapping {
            info: self.info.clone(),
            raw,
            _owner: self,
        }))
    }
}

// ============================================================================
// Disk view
// ============================================================================

/// Seek/read view over a pooled sync handle; all reads are positional so the
/// handle carries no cursor state of its own.
struct DiskFileView {
    flags: FileFlags,
    info: String,
    range: FileRange,
    offset: u64,
    handle: Option<File>,
    owner: Arc<OsFileReader>,
}

impl FileView for DiskFileView {
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
        let read_size = (dest.len() as u64).min(available) as usize;

        // the handle is only ever taken in drop
        let Some(handle) = self.handle.as_ref() else {
            return 0;
        };
        match read_at_exact(handle, &mut dest[..read_size], self.offset) {
            Ok(actual_read) => {
                self.offset += actual_read;
                actual_read
            }
            Err(error) => {
                tracing::error!(file = %self.info, %error, "sync read failed");
                0
            }
        }
    }
}

impl Drop for DiskFileView {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.owner.release_sync_handle(handle);
        }
    }
}

// ============================================================================
// Mapping
// ============================================================================

/// Platform mapping of a file range. Start offsets get aligned down to the
/// mapping granularity internally; `data()` accounts for the shift.
struct RawFileMap {
    base: *mut u8,
    map_len: usize,
    data_offset: usize,
    size: usize,
}

impl RawFileMap {
    fn data(&self) -> &[u8] {
        // Safety: base..base+map_len stays mapped until drop
        unsafe { std::slice::from_raw_parts(self.base.add(self.data_offset), self.size) }
    }
}

unsafe impl Send for RawFileMap {}
unsafe impl Sync for RawFileMap {}

impl Drop for RawFileMap {
    fn drop(&mut self) {
        platform::unmap(self.base, self.map_len);
    }
}

struct OsFileMapping {
    info: String,
    raw: RawFileMap,
    /// Keeps the reader (and on Windows its mapping object) alive.
    _owner: Arc<OsFileReader>,
}

impl FileMapping for OsFileMapping {
    fn info(&self) -> &str {
        &self.info
    }

    fn size(&self) -> u64 {
        self.raw.size as u64
    }

    fn data(&self) -> &[u8] {
        self.raw.data()
    }
}

// ============================================================================
// Platform mapping backends
// ============================================================================

#[cfg(unix)]
mod platform {
    use super::RawFileMap;
    use crate::file::range::FileRange;
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    pub fn map_range(file: &File, range: FileRange) -> Option<RawFileMap> {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
        let aligned_start = range.start() & !(page_size - 1);
        let data_offset = (range.start() - aligned_start) as usize;
        let map_len = range.size() as usize + data_offset;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                map_len,
                libc::PROT_READ,
                libc::MAP_PRIVATE,
                file.as_raw_fd(),
                aligned_start as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            tracing::error!(range = %range, "mmap of file range failed");
            return None;
        }

        Some(RawFileMap {
            base: ptr as *mut u8,
            map_len,
            data_offset,
            size: range.size() as usize,
        })
    }

    pub fn unmap(base: *mut u8, map_len: usize) {
        unsafe {
            libc::munmap(base as *mut libc::c_void, map_len);
        }
    }
}

#[cfg(windows)]
mod platform {
    use super::RawFileMap;
    use crate::file::range::FileRange;
    use std::fs::File;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::System::Memory::{
        CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_READ, PAGE_READONLY,
    };

    /// View offsets must align to the allocation granularity.
    const MAP_GRANULARITY: u64 = 64 * 1024;

    pub fn create_whole_file_mapping(file: &File) -> Option<isize> {
        let handle = unsafe {
            CreateFileMappingW(
                file.as_raw_handle() as _,
                std::ptr::null(),
                PAGE_READONLY,
                0,
                0,
                std::ptr::null(),
            )
        };
        if handle.is_null() {
            tracing::error!("CreateFileMapping failed");
            None
        } else {
            Some(handle as isize)
        }
    }

    pub fn map_range(mapping_handle: isize, range: FileRange) -> Option<RawFileMap> {
        if mapping_handle == 0 {
            return None;
        }

        let aligned_start = range.start() & !(MAP_GRANULARITY - 1);
        let data_offset = (range.start() - aligned_start) as usize;
        let map_len = range.size() as usize + data_offset;

        let view = unsafe {
            MapViewOfFile(
                mapping_handle as _,
                FILE_MAP_READ,
                (aligned_start >> 32) as u32,
                (aligned_start & 0xFFFF_FFFF) as u32,
                map_len,
            )
        };
        if view.Value.is_null() {
            tracing::error!(range = %range, "MapViewOfFile failed");
            return None;
        }

        Some(RawFileMap {
            base: view.Value as *mut u8,
            map_len,
            data_offset,
            size: range.size() as usize,
        })
    }

    pub fn unmap(base: *mut u8, _map_len: usize) {
        unsafe {
            UnmapViewOfFile(windows_sys::Win32::System::Memory::MEMORY_MAPPED_VIEW_ADDRESS {
                Value: base as _,
            });
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    pub fn unmap(_base: *mut u8, _map_len: usize) {}
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::heap_pool;
    use std::io::Write;

    fn temp_file(content: &[u8]) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut file = File::create(&path).unwrap();
        file.write_all(content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_open_missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(OsFileReader::open(&dir.path().join("absent.bin"), false).is_none());
    }

    #[test]
    fn test_reader_reports_size() {
        let (_dir, path) = temp_file(b"Ala ma kota");
        let reader = OsFileReader::open(&path, false).unwrap();
        assert_eq!(reader.size(), 11);
        assert!(reader.flags().contains(FileFlags::BUFFERED));
    }

    #[test]
    fn test_load_to_buffer_round_trips() {
        let (_dir, path) = temp_file(b"Ala ma kota");
        let reader = OsFileReader::open(&path, false).unwrap();

        let loaded = reader
            .load_to_buffer(heap_pool(), reader.full_range())
            .unwrap();
        assert_eq!(&loaded[..], b"Ala ma kota");

        let middle = reader
            .load_to_buffer(heap_pool(), FileRange::new(4, 6))
            .unwrap();
        assert_eq!(&middle[..], b"ma");
    }

    #[test]
    fn test_view_reads_through_pooled_handle() {
        let (_dir, path) = temp_file(b"Ala ma kota");
        let reader = OsFileReader::open(&path, false).unwrap();

        let mut view = reader.clone().create_view(reader.full_range()).unwrap();
        let mut buffer = [0u8; 64];
        assert_eq!(view.read_sync(&mut buffer), 11);
        assert_eq!(&buffer[..11], b"Ala ma kota");
        assert_eq!(view.read_sync(&mut buffer), 0);

        // seeking back re-reads
        view.seek(4);
        assert_eq!(view.read_sync(&mut buffer[..2]), 2);
        assert_eq!(&buffer[..2], b"ma");
    }

    #[test]
    fn test_two_views_have_independent_offsets() {
        let (_dir, path) = temp_file(b"0123456789");
        let reader = OsFileReader::open(&path, false).unwrap();

        let mut a = reader.clone().create_view(FileRange::new(0, 5)).unwrap();
        let mut b = reader.clone().create_view(FileRange::new(5, 10)).unwrap();

        let mut buffer = [0u8; 8];
        assert_eq!(a.read_sync(&mut buffer[..3]), 3);
        assert_eq!(&buffer[..3], b"012");
        assert_eq!(b.read_sync(&mut buffer[..3]), 3);
        assert_eq!(&buffer[..3], b"567");
        assert_eq!(a.read_sync(&mut buffer[..8]), 2);
        assert_eq!(&buffer[..2], b"34");
    }

    #[cfg(unix)]
    #[test]
    fn test_mapping_exposes_file_content() {
        let (_dir, path) = temp_file(b"Ala ma kota");
        let reader = OsFileReader::open(&path, true).unwrap();
        assert!(reader.flags().contains(FileFlags::MEMORY_MAPPED));

        let mapping = reader.clone().create_mapping(reader.full_range()).unwrap();
        assert_eq!(mapping.size(), 11);
        assert_eq!(mapping.data(), b"Ala ma kota");

        let partial = reader.clone().create_mapping(FileRange::new(4, 6)).unwrap();
        assert_eq!(partial.data(), b"ma");
    }

    #[test]
    fn test_mapping_requires_mmap_mode() {
        let (_dir, path) = temp_file(b"Ala ma kota");
        let reader = OsFileReader::open(&path, false).unwrap();
        assert!(reader.clone().create_mapping(reader.full_range()).is_none());
    }

    #[test]
    fn test_async_read_through_dispatcher() {
        use std::sync::atomic::{AtomicI64, Ordering};
        use std::time::{Duration, Instant};

        let (_dir, path) = temp_file(b"Ala ma kota");
        let reader = OsFileReader::open(&path, false).unwrap();

        let mut buffer = vec![0u8; 11];
        let result = Arc::new(AtomicI64::new(i64::MIN));
        let slot = result.clone();
        unsafe {
            reader.read_async(
                FileRange::new(0, 11),
                buffer.as_mut_ptr(),
                Box::new(move |read| slot.store(read, Ordering::Release)),
            );
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while result.load(Ordering::Acquire) == i64::MIN {
            assert!(Instant::now() < deadline, "async read timed out");
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(result.load(Ordering::Acquire), 11);
        assert_eq!(&buffer[..], b"Ala ma kota");
    }
}
