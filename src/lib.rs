//! A streaming multipart/form-data upload engine for tokio.rs in Rust.
//!
//! The crate works at two levels:
//!
//! * [`Multipart`] is the tokenizer. It reads a body stream chunk by chunk and
//!   yields one [`Field`] per part, itself a stream of the part's bytes. Only
//!   a bounded window of the body is ever buffered.
//! * [`Multer`] is the upload engine on top. It classifies each part as a text
//!   field or a file, applies [`Limits`], a [`Selection`] and an optional file
//!   filter, hands files to a [`StorageEngine`] ([`MemoryStorage`] or
//!   [`DiskStorage`] out of the box) and collects everything into a
//!   [`ParseResult`].
//!
//! # Examples
//!
//! ```
//! use multer_upload::{Limits, Multer, MultipartOptions};
//! # use bytes::Bytes;
//! # use std::convert::Infallible;
//! # use futures_util::stream::once;
//!
//! # async fn run() {
//! # let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_file_field\"; filename=\"a.txt\"\r\nContent-Type: text/plain\r\n\r\nhello\r\n--X-BOUNDARY--\r\n";
//! # let some_stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
//! let multer = Multer::any(MultipartOptions::new().limits(Limits::new().max_files(4)));
//!
//! let result = multer
//!     .parse_request("multipart/form-data; boundary=X-BOUNDARY", some_stream)
//!     .await
//!     .unwrap();
//!
//! for field in result.fields() {
//!     println!("{} = {}", field.field_name(), field.value());
//! }
//! for file in result.files() {
//!     println!("{}: {} ({} bytes)", file.field_name(), file.original_file_name(), file.size());
//! }
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(run());
//! ```
//!
//! ## Optional features
//!
//! **`json`**: Adds [`Field::json`] and [`ParseResult::field_json`].
//!
//! **`serde`**: Lets [`Limits`] be read from configuration files.
//!
//! **`tokio-io`**: Adds [`Multipart::with_reader`] to parse any `AsyncRead`.

#![cfg_attr(nightly, feature(doc_cfg))]

pub use bytes;
pub use collector::{FieldEntry, ParseResult};
pub use constraints::Constraints;
pub use error::{Error, ErrorKind};
pub use field::Field;
pub use limits::{LimitEnforcer, Limits};
pub use multipart::Multipart;
pub use options::{FileFilter, MultipartOptions};
pub use part::PartMetadata;
pub use selection::{FieldSpec, Selection};
pub use size_limit::SizeLimit;
pub use storage::{
    random_file_name, DiskStorage, FileDescriptor, MemoryStorage, PartStream, StorageEngine, StorageKind, StoredData,
};
pub use upload::Multer;

mod buffer;
mod collector;
mod constants;
mod constraints;
mod content_disposition;
mod error;
mod field;
mod helpers;
mod limits;
mod multipart;
mod options;
mod part;
mod selection;
mod size_limit;
mod state;
mod storage;
mod upload;

/// A Result type often returned from methods that can have `multer-upload` errors.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Parses the `Content-Type` header to extract the boundary value.
pub fn parse_boundary<T: AsRef<str>>(content_type: T) -> Result<String> {
    let m = content_type
        .as_ref()
        .parse::<mime::Mime>()
        .map_err(crate::Error::DecodeContentType)?;

    if !(m.type_() == mime::MULTIPART && m.subtype() == mime::FORM_DATA) {
        return Err(crate::Error::NoMultipart);
    }

    m.get_param(mime::BOUNDARY)
        .map(|name| name.as_str().to_owned())
        .ok_or(crate::Error::NoBoundary)
}
