use std::borrow::Cow;

use encoding_rs::{Encoding, UTF_8};
use lazy_static::lazy_static;
use percent_encoding::percent_decode;
use regex::bytes::Regex;

pub(crate) const DEFAULT_WHOLE_STREAM_SIZE_LIMIT: u64 = u64::MAX;
pub(crate) const DEFAULT_PER_FIELD_SIZE_LIMIT: u64 = u64::MAX;

pub(crate) const MAX_HEADERS: usize = 32;
pub(crate) const BOUNDARY_EXT: &str = "--";
pub(crate) const CR: &str = "\r";
pub(crate) const CRLF: &str = "\r\n";
pub(crate) const CRLF_CRLF: &str = "\r\n\r\n";

/// Random bytes behind a generated disk file name; the name is their hex form.
pub(crate) const RANDOM_FILE_NAME_BYTES: usize = 16;

lazy_static! {
    // One `key=value` parameter; quoted values may contain `;` and `\"`.
    static ref CONTENT_DISPOSITION_PARAM_RE: Regex =
        Regex::new(r#"(?s-u);\s*([^=;\s]+)\s*=\s*(?:"((?:[^"\\]|\\.)*)"|([^;\s]*(?:\s+[^;\s]+)*))"#).unwrap();
    static ref QUOTED_PAIR_RE: Regex = Regex::new(r"(?s-u)\\(.)").unwrap();
    // RFC 5987 `charset'language'value-chars`.
    static ref EXT_VALUE_RE: Regex = Regex::new(r"(?s-u)^([^']*)'[^']*'(.*)$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContentDispositionAttr {
    Name,
    FileName,
}

impl ContentDispositionAttr {
    /// Extract the value of this attribute from a `Content-Disposition`
    /// header value.
    ///
    /// Quoted (`name="a b"`) and bare (`name=ab`) values are accepted. For
    /// `FileName`, the RFC 5987 extended form `filename*=UTF-8''a%20b.txt`
    /// takes precedence over the plain one. A `filename*` that can't be
    /// decoded still names a file: the plain `filename` is used if present,
    /// the raw extended value otherwise.
    pub fn extract_from<'h>(&self, header: &'h [u8]) -> Option<Cow<'h, str>> {
        let key: &[u8] = match self {
            ContentDispositionAttr::Name => b"name",
            ContentDispositionAttr::FileName => b"filename",
        };
        let plain = find_param(header, key).and_then(into_str);

        if *self == ContentDispositionAttr::FileName {
            if let Some(ext) = find_param(header, b"filename*") {
                return match decode_ext_value(&ext) {
                    Some(decoded) => Some(Cow::Owned(decoded)),
                    None => plain.or_else(|| Some(Cow::Owned(String::from_utf8_lossy(&ext).into_owned()))),
                };
            }
        }

        plain
    }
}

fn find_param<'h>(header: &'h [u8], key: &[u8]) -> Option<Cow<'h, [u8]>> {
    let caps = CONTENT_DISPOSITION_PARAM_RE
        .captures_iter(header)
        .find(|caps| caps[1].eq_ignore_ascii_case(key))?;

    match (caps.get(2), caps.get(3)) {
        (Some(quoted), _) => Some(QUOTED_PAIR_RE.replace_all(quoted.as_bytes(), &b"$1"[..])),
        (None, Some(bare)) => Some(Cow::Borrowed(bare.as_bytes())),
        (None, None) => None,
    }
}

fn into_str(raw: Cow<'_, [u8]>) -> Option<Cow<'_, str>> {
    match raw {
        Cow::Borrowed(bytes) => std::str::from_utf8(bytes).ok().map(Cow::Borrowed),
        Cow::Owned(bytes) => String::from_utf8(bytes).ok().map(Cow::Owned),
    }
}

fn decode_ext_value(raw: &[u8]) -> Option<String> {
    let caps = EXT_VALUE_RE.captures(raw)?;
    let encoding = Encoding::for_label(&caps[1]).unwrap_or(UTF_8);
    let bytes: Cow<'_, [u8]> = percent_decode(&caps[2]).into();

    let (text, _, malformed) = encoding.decode(&bytes);
    if malformed {
        return None;
    }
    Some(text.into_owned())
}
