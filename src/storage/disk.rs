use std::fmt::{self, Debug};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use super::{FileDescriptor, PartStream, StorageEngine, StoredData};
use crate::constants::RANDOM_FILE_NAME_BYTES;
use crate::PartMetadata;

type FileNameFn = Arc<dyn Fn(&PartMetadata) -> String + Send + Sync>;

/// Writes each uploaded file to its own file under a destination directory.
///
/// The directory is created on first use. Files get a random hexadecimal name
/// unless [`file_name`](DiskStorage::file_name) says otherwise; the client's
/// file name is never used as a path.
///
/// A file whose part fails midway, or whose parse is dropped, is deleted
/// before the error is returned.
///
/// # Examples
///
/// ```
/// use multer_upload::DiskStorage;
///
/// let storage = DiskStorage::new("/tmp/uploads")
///     .file_name(|meta| format!("{}-{}", meta.index(), meta.field_name()));
/// ```
#[derive(Clone)]
pub struct DiskStorage {
    destination: PathBuf,
    file_name: Option<FileNameFn>,
}

impl DiskStorage {
    pub fn new<P: Into<PathBuf>>(destination: P) -> DiskStorage {
        DiskStorage {
            destination: destination.into(),
            file_name: None,
        }
    }

    /// Names stored files with `f` instead of a random name.
    ///
    /// Two parts given the same name overwrite each other.
    pub fn file_name<F>(self, f: F) -> DiskStorage
    where
        F: Fn(&PartMetadata) -> String + Send + Sync + 'static,
    {
        DiskStorage {
            file_name: Some(Arc::new(f)),
            ..self
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    fn generate_file_name(&self, meta: &PartMetadata) -> String {
        match self.file_name.as_ref() {
            Some(f) => f(meta),
            None => random_file_name(),
        }
    }
}

impl Debug for DiskStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskStorage")
            .field("destination", &self.destination)
            .field("file_name", &self.file_name.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// A fresh random file name: 32 lowercase hex digits.
pub fn random_file_name() -> String {
    let bytes: [u8; RANDOM_FILE_NAME_BYTES] = rand::random();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[async_trait]
impl StorageEngine for DiskStorage {
    async fn store(&self, meta: &PartMetadata, mut body: PartStream<'_>) -> crate::Result<FileDescriptor> {
        fs::create_dir_all(&self.destination)
            .await
            .map_err(storage_error(&self.destination))?;

        let file_name = self.generate_file_name(meta);
        let path = self.destination.join(&file_name);

        // Removes the file if this future is dropped mid-write.
        let partial = PartialFile::new(&path);
        let written = write_body(&path, &mut body).await;
        partial.keep();

        let size = match written {
            Ok(size) => size,
            Err(err) => {
                remove_partial(&path).await;
                return Err(err);
            }
        };

        log::debug!("stored {} bytes of {:?} at {}", size, meta.file_name(), path.display());

        Ok(FileDescriptor::new(
            meta,
            size,
            StoredData::Disk {
                destination: self.destination.clone(),
                file_name,
                path,
            },
        ))
    }
}

async fn write_body(path: &Path, body: &mut PartStream<'_>) -> crate::Result<u64> {
    let mut file = File::create(path).await.map_err(storage_error(path))?;
    let mut size = 0u64;

    while let Some(chunk) = body.try_next().await? {
        file.write_all(&chunk).await.map_err(storage_error(path))?;
        size += chunk.len() as u64;
    }

    file.flush().await.map_err(storage_error(path))?;
    Ok(size)
}

async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => log::debug!("removed partial upload {}", path.display()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => log::warn!("failed to remove partial upload {}: {}", path.display(), err),
    }
}

fn storage_error(path: &Path) -> impl FnOnce(io::Error) -> crate::Error + '_ {
    move |source| crate::Error::StorageWrite {
        path: Some(path.to_owned()),
        source,
    }
}

/// Removes a file being written unless [`keep`](PartialFile::keep) is called,
/// which covers a `store` future dropped mid-write.
struct PartialFile {
    path: Option<PathBuf>,
}

impl PartialFile {
    fn new(path: &Path) -> PartialFile {
        PartialFile {
            path: Some(path.to_owned()),
        }
    }

    fn keep(mut self) {
        self.path = None;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        let path = match self.path.take() {
            Some(path) => path,
            None => return,
        };

        match std::fs::remove_file(&path) {
            Ok(()) => log::debug!("removed partial upload {}", path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => log::warn!("failed to remove partial upload {}: {}", path.display(), err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageKind;
    use bytes::Bytes;
    use futures_util::stream::{self, StreamExt};
    use http::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION};

    fn file_meta() -> PartMetadata {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static(r#"form-data; name="doc"; filename="../../etc/passwd""#),
        );
        PartMetadata::from_headers(&headers, 0).unwrap()
    }

    fn dir_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
    }

    #[test]
    fn test_random_file_name() {
        let a = random_file_name();
        let b = random_file_name();

        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_disk_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("nested").join("uploads");
        let storage = DiskStorage::new(&dest);

        let chunks: Vec<crate::Result<Bytes>> = vec![Ok(Bytes::from_static(b"hello ")), Ok(Bytes::from_static(b"disk"))];
        let descriptor = storage.store(&file_meta(), Box::pin(stream::iter(chunks))).await.unwrap();

        assert_eq!(descriptor.storage_kind(), StorageKind::Disk);
        assert_eq!(descriptor.size(), 10);
        assert_eq!(descriptor.destination(), Some(dest.as_path()));
        assert_eq!(descriptor.original_file_name(), "../../etc/passwd");

        let path = descriptor.path().unwrap();
        assert_eq!(path.parent(), Some(dest.as_path()));
        assert_eq!(descriptor.file_name().map(str::len), Some(32));
        assert_eq!(std::fs::read(path).unwrap(), b"hello disk");
    }

    #[tokio::test]
    async fn test_disk_custom_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path()).file_name(|meta| format!("{}.upload", meta.field_name()));

        let chunks: Vec<crate::Result<Bytes>> = vec![Ok(Bytes::from_static(b"x"))];
        let descriptor = storage.store(&file_meta(), Box::pin(stream::iter(chunks))).await.unwrap();

        assert_eq!(descriptor.file_name(), Some("doc.upload"));
        assert_eq!(std::fs::read(dir.path().join("doc.upload")).unwrap(), b"x");
    }

    #[tokio::test]
    async fn test_disk_removes_partial_file_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());

        let chunks: Vec<crate::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(crate::Error::IncompleteFieldData {
                field_name: Some("doc".to_owned()),
            }),
        ];
        let result = storage.store(&file_meta(), Box::pin(stream::iter(chunks))).await;

        assert!(matches!(result, Err(crate::Error::IncompleteFieldData { .. })));
        assert_eq!(dir_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_disk_removes_partial_file_when_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());

        let first: Vec<crate::Result<Bytes>> = vec![Ok(Bytes::from_static(b"never finished"))];
        let body = stream::iter(first).chain(stream::pending());
        let meta = file_meta();
        let store = storage.store(&meta, Box::pin(body));

        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(50), store).await;
        assert!(timed_out.is_err());
        assert_eq!(dir_entries(dir.path()), 0);
    }
}
