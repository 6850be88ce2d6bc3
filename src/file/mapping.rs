// # File Mappings
//
// A mapping is a pointer-accessible window onto a sub-range of a reader:
// memory-mapped where the backend supports it, a wrapped buffer otherwise.
// The data pointer stays valid for the mapping's entire lifetime.

use bytes::Bytes;

/// Memory-mapped (or memory-wrapped) region of a file.
pub trait FileMapping: Send + Sync {
    /// Debug information about the source, usually path and offset.
    fn info(&self) -> &str;

    /// Size of the mapped region.
    fn size(&self) -> u64;

    /// The mapped bytes.
    fn data(&self) -> &[u8];

    /// Copy of the mapped region as a shared buffer.
    fn as_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.data())
    }
}
