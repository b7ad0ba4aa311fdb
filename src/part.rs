use http::header::HeaderMap;
use mime::Mime;

use crate::content_disposition::ContentDisposition;
use crate::Field;

/// What a part's header block says about it.
///
/// A part is a file exactly when its `Content-Disposition` carries a
/// `filename` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartMetadata {
    field_name: String,
    file_name: Option<String>,
    content_type: Option<Mime>,
    index: usize,
}

impl PartMetadata {
    /// Classifies a part from its headers.
    ///
    /// # Errors
    ///
    /// [`Error::MissingContentDisposition`](crate::Error::MissingContentDisposition)
    /// when the header is absent and
    /// [`Error::MissingFieldName`](crate::Error::MissingFieldName) when it has
    /// no non-empty `name`.
    pub fn from_headers(headers: &HeaderMap, index: usize) -> crate::Result<PartMetadata> {
        let content_disposition = ContentDisposition::parse(headers).ok_or(crate::Error::MissingContentDisposition)?;
        let content_type = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<Mime>().ok());

        PartMetadata::build(content_disposition, content_type, index)
    }

    pub(crate) fn from_field(field: &Field<'_>) -> crate::Result<PartMetadata> {
        if !field.headers().contains_key(http::header::CONTENT_DISPOSITION) {
            return Err(crate::Error::MissingContentDisposition);
        }

        let content_disposition = ContentDisposition {
            field_name: field.name().map(str::to_owned),
            file_name: field.file_name().map(str::to_owned),
        };

        PartMetadata::build(content_disposition, field.content_type().cloned(), field.index())
    }

    fn build(
        content_disposition: ContentDisposition,
        content_type: Option<Mime>,
        index: usize,
    ) -> crate::Result<PartMetadata> {
        let ContentDisposition { field_name, file_name } = content_disposition;

        let field_name = match field_name {
            Some(name) if !name.is_empty() => name,
            _ => return Err(crate::Error::MissingFieldName),
        };

        Ok(PartMetadata {
            field_name,
            file_name,
            content_type,
            index,
        })
    }

    /// The form field this part belongs to.
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    /// The client-side file name, present for file parts only.
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// The declared `Content-Type`, if any.
    pub fn declared_content_type(&self) -> Option<&Mime> {
        self.content_type.as_ref()
    }

    /// The effective content type: the declared one, or `text/plain` for
    /// fields and `application/octet-stream` for files.
    pub fn content_type(&self) -> Mime {
        match (&self.content_type, self.is_file()) {
            (Some(mime), _) => mime.clone(),
            (None, true) => mime::APPLICATION_OCTET_STREAM,
            (None, false) => mime::TEXT_PLAIN,
        }
    }

    pub fn is_file(&self) -> bool {
        self.file_name.is_some()
    }

    /// Position of the part in the body, starting at zero.
    pub fn index(&self) -> usize {
        self.index
    }
}
