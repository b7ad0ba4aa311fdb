use http::header::{self, HeaderMap};

use crate::constants::ContentDispositionAttr;

#[derive(Debug, Clone)]
pub(crate) struct ContentDisposition {
    pub(crate) field_name: Option<String>,
    pub(crate) file_name: Option<String>,
}

impl ContentDisposition {
    /// Returns `None` when the header is absent.
    pub fn parse(headers: &HeaderMap) -> Option<ContentDisposition> {
        let content_disposition = headers.get(header::CONTENT_DISPOSITION)?.as_bytes();

        let field_name = ContentDispositionAttr::Name
            .extract_from(content_disposition)
            .map(|s| s.into_owned());
        let file_name = ContentDispositionAttr::FileName
            .extract_from(content_disposition)
            .map(|s| s.into_owned());

        Some(ContentDisposition { field_name, file_name })
    }
}
