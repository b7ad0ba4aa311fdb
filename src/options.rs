use std::collections::HashSet;
use std::fmt::{self, Debug};
use std::path::PathBuf;
use std::sync::Arc;

use crate::constraints::Constraints;
use crate::{DiskStorage, Limits, MemoryStorage, PartMetadata, Selection, StorageEngine};

/// Decides whether a file part is stored. Rejected files are skipped and
/// reported in [`ParseResult::rejected`](crate::ParseResult::rejected).
pub type FileFilter = Arc<dyn Fn(&PartMetadata) -> bool + Send + Sync>;

/// Everything a [`Multer`](crate::Multer) needs to know to parse a body.
///
/// Defaults: no limits, every field name allowed, no filter, files kept in
/// memory, files accepted on any field.
///
/// # Examples
///
/// ```
/// use multer_upload::{Limits, MultipartOptions};
///
/// let options = MultipartOptions::new()
///     .dest("/tmp/uploads")
///     .limits(Limits::new().max_files(2))
///     .filter(|meta| meta.content_type().type_() == mime::IMAGE);
/// ```
#[derive(Clone)]
pub struct MultipartOptions {
    pub(crate) limits: Limits,
    pub(crate) allowed_fields: Option<HashSet<String>>,
    pub(crate) filter: Option<FileFilter>,
    pub(crate) storage: Arc<dyn StorageEngine>,
    pub(crate) selection: Selection,
}

impl MultipartOptions {
    pub fn new() -> MultipartOptions {
        MultipartOptions::default()
    }

    pub fn limits(self, limits: Limits) -> MultipartOptions {
        MultipartOptions { limits, ..self }
    }

    /// Only parts named in `fields` are accepted; any other name fails the
    /// parse with [`Error::UnknownField`](crate::Error::UnknownField).
    pub fn allowed_fields<I, N>(self, fields: I) -> MultipartOptions
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        MultipartOptions {
            allowed_fields: Some(fields.into_iter().map(Into::into).collect()),
            ..self
        }
    }

    pub fn filter<F>(self, filter: F) -> MultipartOptions
    where
        F: Fn(&PartMetadata) -> bool + Send + Sync + 'static,
    {
        MultipartOptions {
            filter: Some(Arc::new(filter)),
            ..self
        }
    }

    pub fn storage<S: StorageEngine + 'static>(self, storage: S) -> MultipartOptions {
        MultipartOptions {
            storage: Arc::new(storage),
            ..self
        }
    }

    /// Shorthand for `storage(DiskStorage::new(path))`.
    pub fn dest<P: Into<PathBuf>>(self, path: P) -> MultipartOptions {
        self.storage(DiskStorage::new(path))
    }

    pub fn selection(self, selection: Selection) -> MultipartOptions {
        MultipartOptions { selection, ..self }
    }

    pub fn get_limits(&self) -> &Limits {
        &self.limits
    }

    pub fn get_selection(&self) -> &Selection {
        &self.selection
    }

    /// The tokenizer rules matching these options, for building a
    /// [`Multipart`](crate::Multipart) by hand.
    pub fn constraints(&self) -> Constraints {
        let constraints = self.limits.constraints();
        match self.allowed_fields.as_ref() {
            Some(fields) => constraints.allowed_fields(fields.iter().cloned()),
            None => constraints,
        }
    }

    pub(crate) fn is_allowed(&self, field_name: &str) -> bool {
        self.allowed_fields
            .as_ref()
            .map_or(true, |fields| fields.contains(field_name))
    }

    pub(crate) fn accepts_file(&self, meta: &PartMetadata) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(meta))
    }
}

impl Default for MultipartOptions {
    fn default() -> Self {
        MultipartOptions {
            limits: Limits::default(),
            allowed_fields: None,
            filter: None,
            storage: Arc::new(MemoryStorage),
            selection: Selection::Any,
        }
    }
}

impl Debug for MultipartOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultipartOptions")
            .field("limits", &self.limits)
            .field("allowed_fields", &self.allowed_fields)
            .field("filter", &self.filter.as_ref().map(|_| "<fn>"))
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}
