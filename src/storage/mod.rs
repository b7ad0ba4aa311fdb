//! Where uploaded files end up.
//!
//! A [`StorageEngine`] receives one file part at a time as a stream of
//! chunks and turns it into a [`FileDescriptor`]. Two engines are built in:
//! [`MemoryStorage`] keeps the bytes in a buffer, [`DiskStorage`] writes them
//! to a file under a destination directory. Anything else (object stores,
//! hashing sinks, ...) implements the trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use mime::Mime;

use crate::PartMetadata;

mod disk;
mod memory;

pub use disk::{random_file_name, DiskStorage};
pub use memory::MemoryStorage;

/// The body of a file part as handed to a [`StorageEngine`].
///
/// Size limits are checked while it is polled: an oversized file surfaces as
/// an `Err` item, which the engine must propagate.
pub type PartStream<'a> = BoxStream<'a, crate::Result<Bytes>>;

/// A sink for file parts.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Consumes `body` and reports where it went.
    ///
    /// Errors from `body` must be returned as-is. Nothing produced for a part
    /// whose store failed may be left behind.
    async fn store(&self, meta: &PartMetadata, body: PartStream<'_>) -> crate::Result<FileDescriptor>;
}

/// Which backend holds a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Memory,
    Disk,
}

/// The stored bytes of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredData {
    /// The whole file, in memory.
    Memory(Bytes),
    /// A file written under `destination`. It is left in place after the
    /// parse; removing it is up to the caller.
    Disk {
        destination: PathBuf,
        file_name: String,
        path: PathBuf,
    },
}

/// An uploaded file that was stored successfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    field_name: String,
    original_file_name: String,
    content_type: Mime,
    size: u64,
    data: StoredData,
}

impl FileDescriptor {
    /// Builds the descriptor of a file part once `size` bytes of it are held
    /// in `data`.
    pub fn new(meta: &PartMetadata, size: u64, data: StoredData) -> FileDescriptor {
        FileDescriptor {
            field_name: meta.field_name().to_owned(),
            original_file_name: meta.file_name().unwrap_or_default().to_owned(),
            content_type: meta.content_type(),
            size,
            data,
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// The file name the client sent.
    pub fn original_file_name(&self) -> &str {
        &self.original_file_name
    }

    pub fn content_type(&self) -> &Mime {
        &self.content_type
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn storage_kind(&self) -> StorageKind {
        match self.data {
            StoredData::Memory(_) => StorageKind::Memory,
            StoredData::Disk { .. } => StorageKind::Disk,
        }
    }

    /// The file contents, for memory-stored files.
    pub fn buffer(&self) -> Option<&Bytes> {
        match &self.data {
            StoredData::Memory(bytes) => Some(bytes),
            StoredData::Disk { .. } => None,
        }
    }

    /// Where the file was written, for disk-stored files.
    pub fn path(&self) -> Option<&Path> {
        match &self.data {
            StoredData::Disk { path, .. } => Some(path),
            StoredData::Memory(_) => None,
        }
    }

    /// The directory the file was written to, for disk-stored files.
    pub fn destination(&self) -> Option<&Path> {
        match &self.data {
            StoredData::Disk { destination, .. } => Some(destination),
            StoredData::Memory(_) => None,
        }
    }

    /// The generated name of the file on disk, for disk-stored files.
    pub fn file_name(&self) -> Option<&str> {
        match &self.data {
            StoredData::Disk { file_name, .. } => Some(file_name),
            StoredData::Memory(_) => None,
        }
    }

    pub fn data(&self) -> &StoredData {
        &self.data
    }

    pub fn into_data(self) -> StoredData {
        self.data
    }
}
