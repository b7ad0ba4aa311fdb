use std::fmt::{self, Debug, Display, Formatter};
use std::io;
use std::path::PathBuf;

use derive_more::Display;
use http::StatusCode;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A set of errors that can occur while parsing a multipart stream, enforcing
/// limits or storing uploaded files.
///
/// Every error is terminal for the parse that produced it.
#[derive(Display)]
#[non_exhaustive]
pub enum Error {
    /// An unknown field is detected when
    /// [`allowed_fields`](crate::Constraints::allowed_fields) are set.
    #[display(fmt = "unknown field received: {}", "field_name.as_deref().unwrap_or(\"<unknown>\")")]
    UnknownField { field_name: Option<String> },

    /// A file arrived on a field that the configured
    /// [`Selection`](crate::Selection) does not accept.
    #[display(fmt = "unexpected file field: {}", field_name)]
    UnexpectedFile { field_name: String },

    /// The stream ended in the middle of a part's body.
    #[display(
        fmt = "field '{}' received with incomplete data",
        "field_name.as_deref().unwrap_or(\"<unknown>\")"
    )]
    IncompleteFieldData { field_name: Option<String> },

    /// Couldn't read the part headers completely: the blank line separating
    /// them from the body never arrived.
    #[display(fmt = "failed to read field complete headers")]
    IncompleteHeaders,

    /// Failed to read headers.
    #[display(fmt = "failed to read headers: {}", _0)]
    ReadHeaderFailed(httparse::Error),

    /// Failed to decode the part's raw header name to
    /// [`HeaderName`](http::header::HeaderName) type.
    #[display(fmt = "failed to decode field's raw header name: {:?} {}", name, cause)]
    DecodeHeaderName { name: String, cause: BoxError },

    /// Failed to decode the part's raw header value to
    /// [`HeaderValue`](http::header::HeaderValue) type.
    #[display(fmt = "failed to decode field's raw header value: {}", cause)]
    DecodeHeaderValue { value: Vec<u8>, cause: BoxError },

    /// The part has no `Content-Disposition` header.
    #[display(fmt = "part has no Content-Disposition header")]
    MissingContentDisposition,

    /// The part's `Content-Disposition` header carries no (or an empty)
    /// `name` parameter.
    #[display(fmt = "part's Content-Disposition has no field name")]
    MissingFieldName,

    /// Multipart stream is incomplete: a boundary line is missing or garbled.
    #[display(fmt = "incomplete multipart stream")]
    IncompleteStream,

    /// The incoming part exceeded the tokenizer's per-field size limit.
    #[display(
        fmt = "field '{}' exceeded the maximum size limit: {} bytes",
        "field_name.as_deref().unwrap_or(\"<unknown>\")",
        limit
    )]
    FieldSizeExceeded { limit: u64, field_name: Option<String> },

    /// The incoming stream size exceeded the maximum limit.
    #[display(fmt = "stream size exceeded the maximum limit: {} bytes", limit)]
    StreamSizeExceeded { limit: u64 },

    /// An uploaded file is larger than `max_file_size`.
    #[display(fmt = "File too large: '{}' exceeded {} bytes", field_name, limit)]
    FileTooLarge { limit: u64, field_name: String },

    /// A text field is larger than `max_field_size`.
    #[display(fmt = "Field value too long: '{}' exceeded {} bytes", field_name, limit)]
    FieldTooLarge { limit: u64, field_name: String },

    /// More files than allowed, either overall or for one field.
    #[display(fmt = "Too many files: {}", "too_many_files(limit, field_name)")]
    TooManyFiles { limit: usize, field_name: Option<String> },

    /// More text fields than allowed.
    #[display(fmt = "Too many fields: at most {} allowed", limit)]
    TooManyFields { limit: usize },

    /// More parts than allowed.
    #[display(fmt = "Too many parts: at most {} allowed", limit)]
    TooManyParts { limit: usize },

    /// Stream read failed.
    #[display(fmt = "stream read failed: {}", _0)]
    StreamReadFailed(BoxError),

    /// Writing an uploaded file to its storage backend failed.
    #[display(fmt = "failed to store file{}: {}", "store_target(path)", source)]
    StorageWrite { path: Option<PathBuf>, source: io::Error },

    /// Failed to lock the multipart shared state for any changes.
    #[display(fmt = "failed to lock multipart state")]
    LockFailure,

    /// The multipart stream was already consumed by an earlier parse.
    #[display(fmt = "multipart stream has already been consumed")]
    AlreadyConsumed,

    /// The parse was cancelled before the stream ended.
    #[display(fmt = "multipart parse aborted")]
    Aborted,

    /// The `Content-Type` header is not `multipart/form-data`.
    #[display(fmt = "Content-Type is not multipart/form-data")]
    NoMultipart,

    /// Failed to convert the `Content-Type` to [`mime::Mime`] type.
    #[display(fmt = "Failed to convert Content-Type to `mime::Mime` type: {}", _0)]
    DecodeContentType(mime::FromStrError),

    /// No boundary found in `Content-Type` header.
    #[display(fmt = "multipart boundary not found in Content-Type")]
    NoBoundary,

    /// Failed to decode field data as `JSON`.
    #[cfg(feature = "json")]
    #[cfg_attr(nightly, doc(cfg(feature = "json")))]
    #[display(fmt = "failed to decode field data as JSON: {}", _0)]
    DecodeJson(serde_json::Error),
}

/// Coarse classification of an [`Error`], matching how an HTTP layer is
/// expected to react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The body is not valid multipart data.
    Malformed,
    /// A part's header block is unusable.
    InvalidPartHeader,
    /// The body ended in the middle of a part.
    TruncatedBody,
    FileTooLarge,
    FieldTooLarge,
    TooManyFiles,
    TooManyFields,
    TooManyParts,
    StreamSizeExceeded,
    UnknownField,
    UnexpectedFile,
    /// The body stream itself failed.
    Stream,
    StorageWrite,
    Aborted,
    /// The engine was used incorrectly, e.g. a stream was parsed twice.
    Usage,
}

impl Error {
    /// Returns the class this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownField { .. } => ErrorKind::UnknownField,
            Error::UnexpectedFile { .. } => ErrorKind::UnexpectedFile,
            Error::IncompleteFieldData { .. } => ErrorKind::TruncatedBody,
            Error::ReadHeaderFailed(_)
            | Error::DecodeHeaderName { .. }
            | Error::DecodeHeaderValue { .. }
            | Error::MissingContentDisposition
            | Error::MissingFieldName => ErrorKind::InvalidPartHeader,
            Error::IncompleteStream
            | Error::IncompleteHeaders
            | Error::NoMultipart
            | Error::DecodeContentType(_)
            | Error::NoBoundary => ErrorKind::Malformed,
            Error::FieldSizeExceeded { .. } | Error::FieldTooLarge { .. } => ErrorKind::FieldTooLarge,
            Error::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            Error::StreamSizeExceeded { .. } => ErrorKind::StreamSizeExceeded,
            Error::TooManyFiles { .. } => ErrorKind::TooManyFiles,
            Error::TooManyFields { .. } => ErrorKind::TooManyFields,
            Error::TooManyParts { .. } => ErrorKind::TooManyParts,
            Error::StreamReadFailed(_) => ErrorKind::Stream,
            Error::StorageWrite { .. } => ErrorKind::StorageWrite,
            Error::LockFailure | Error::AlreadyConsumed => ErrorKind::Usage,
            Error::Aborted => ErrorKind::Aborted,
            #[cfg(feature = "json")]
            Error::DecodeJson(_) => ErrorKind::Malformed,
        }
    }

    /// The HTTP status an HTTP layer should answer with when a request body
    /// fails with this error.
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::FileTooLarge
            | ErrorKind::FieldTooLarge
            | ErrorKind::TooManyFiles
            | ErrorKind::TooManyFields
            | ErrorKind::TooManyParts
            | ErrorKind::StreamSizeExceeded => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::Malformed
            | ErrorKind::InvalidPartHeader
            | ErrorKind::TruncatedBody
            | ErrorKind::UnknownField
            | ErrorKind::UnexpectedFile
            | ErrorKind::Stream
            | ErrorKind::Aborted => StatusCode::BAD_REQUEST,
            ErrorKind::StorageWrite | ErrorKind::Usage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn too_many_files(limit: &usize, field_name: &Option<String>) -> String {
    match field_name {
        Some(name) => format!("field '{}' accepts at most {}", name, limit),
        None => format!("at most {} allowed", limit),
    }
}

fn store_target(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" at {}", path.display()),
        None => String::new(),
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::StorageWrite { source, .. } => Some(source),
            Error::StreamReadFailed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string().eq(&other.to_string())
    }
}

impl Eq for Error {}
