// shardpack-core/src/storage/traits.rs

//! Storage abstraction traits.

use std::io::{Read, Write};
use std::path::Path;

use crate::error::Result;

/// A handle for reading a whole object.
pub trait StorageReader: Read + Send {
    /// Returns the total size of the object in bytes.
    fn size(&self) -> u64;
}

/// A handle for writing to storage.
///
/// This trait extends `Write` with a method to finalize the write operation.
pub trait StorageWriter: Write + Send {
    /// Finishes the write operation, ensuring all data is persisted.
    ///
    /// After calling `finish`, the writer should not be used again.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing or syncing fails.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// The core storage backend trait.
///
/// # Object Safety
///
/// This trait is object-safe and is shared as `Arc<dyn StorageBackend>`.
pub trait StorageBackend: Send + Sync {
    /// Checks if an object exists at the given path.
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Opens an object for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or cannot be opened.
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Opens an object for writing, truncating it if it exists.
    ///
    /// Parent directories are created if they don't exist.
    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>>;

    /// Deletes an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or cannot be deleted.
    fn delete(&self, path: &Path) -> Result<()>;

    /// Renames an object, replacing the destination if it exists.
    fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Creates a directory and all parent directories.
    fn create_dir_all(&self, path: &Path) -> Result<()>;
}
