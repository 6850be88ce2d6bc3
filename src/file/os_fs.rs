// # OS File-System Entry Points
//
// Thin path-level API over the OS-backed reader: open for reading, bulk
// load, and a crash-safe save that always produces a complete file or leaves
// the old one untouched (write to a temp sibling, then rename over).

use crate::error::{CoreError, Result};
use crate::file::heap_pool;
use crate::file::os_reader::OsFileReader;
use crate::file::reader::FileReader;
use bytes::Bytes;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// How a file should be opened for reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileReadMode {
    /// Plain buffered access; reads go through views or the dispatcher.
    Buffered,
    /// Open with a whole-file mapping object so ranges can be mapped.
    MemoryMapped,
}

/// Open a file for reading. A missing file yields `None`, not an error.
pub fn open_for_reading(path: &Path, mode: FileReadMode) -> Option<Arc<dyn FileReader>> {
    let memory_mapped = mode == FileReadMode::MemoryMapped;
    OsFileReader::open(path, memory_mapped).map(|reader| reader as Arc<dyn FileReader>)
}

/// Load a whole file into a buffer.
pub fn load_file_to_buffer(path: &Path) -> Result<Bytes> {
    let reader = open_for_reading(path, FileReadMode::Buffered)
        .ok_or_else(|| CoreError::NotFound(path.display().to_string()))?;
    reader.load_to_buffer(heap_pool(), reader.full_range())
}

/// Save a buffer to a file with crash-safe overwrite semantics: the data is
/// written to a temporary sibling and renamed into place, so the target is
/// always either the old complete file or the new complete file.
pub fn save_file_from_buffer(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        CoreError::InvalidRange(format!("path '{}' has no parent directory", path.display()))
    })?;
    std::fs::create_dir_all(parent)?;

    let mut temp_path = path.to_path_buf();
    let mut file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    file_name.push(".tmp");
    temp_path.set_file_name(file_name);

    let write_result = (|| -> Result<()> {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(error) = write_result {
        tracing::error!(path = %temp_path.display(), "failed to write temp file");
        let _ = std::fs::remove_file(&temp_path);
        return Err(error);
    }

    if let Err(error) = std::fs::rename(&temp_path, path) {
        tracing::error!(path = %path.display(), %error, "failed to replace file");
        let _ = std::fs::remove_file(&temp_path);
        return Err(error.into());
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
