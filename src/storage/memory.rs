use async_trait::async_trait;
use bytes::BytesMut;
use futures_util::stream::TryStreamExt;

use super::{FileDescriptor, PartStream, StorageEngine, StoredData};
use crate::PartMetadata;

/// Keeps each uploaded file in a single in-memory buffer.
///
/// Pair it with a [`max_file_size`](crate::Limits::max_file_size) limit;
/// nothing else bounds how much it holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryStorage;

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage
    }
}

#[async_trait]
impl StorageEngine for MemoryStorage {
    async fn store(&self, meta: &PartMetadata, mut body: PartStream<'_>) -> crate::Result<FileDescriptor> {
        let mut buf = BytesMut::new();

        while let Some(chunk) = body.try_next().await? {
            buf.extend_from_slice(&chunk);
        }

        let size = buf.len() as u64;
        log::debug!("buffered {} bytes of {:?} in memory", size, meta.file_name());

        Ok(FileDescriptor::new(meta, size, StoredData::Memory(buf.freeze())))
    }
}
