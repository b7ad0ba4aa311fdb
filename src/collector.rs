use std::collections::HashMap;

use crate::{FileDescriptor, PartMetadata};

/// A decoded text field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEntry {
    field_name: String,
    value: String,
}

impl FieldEntry {
    pub fn new<N: Into<String>, V: Into<String>>(field_name: N, value: V) -> FieldEntry {
        FieldEntry {
            field_name: field_name.into(),
            value: value.into(),
        }
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// The outcome of a successful parse.
///
/// Files and fields keep the order their parts appeared in the body. Files
/// turned down by the filter are listed separately in
/// [`rejected`](ParseResult::rejected); they were never stored.
#[derive(Debug, Default)]
pub struct ParseResult {
    files: Vec<FileDescriptor>,
    fields: Vec<FieldEntry>,
    rejected: Vec<PartMetadata>,
}

impl ParseResult {
    pub fn files(&self) -> &[FileDescriptor] {
        &self.files
    }

    pub fn fields(&self) -> &[FieldEntry] {
        &self.fields
    }

    pub fn rejected(&self) -> &[PartMetadata] {
        &self.rejected
    }

    /// The first file uploaded on `field_name`.
    pub fn file(&self, field_name: &str) -> Option<&FileDescriptor> {
        self.files.iter().find(|file| file.field_name() == field_name)
    }

    /// Every file uploaded on `field_name`, in body order.
    pub fn files_named<'a>(&'a self, field_name: &'a str) -> impl Iterator<Item = &'a FileDescriptor> + 'a {
        self.files.iter().filter(move |file| file.field_name() == field_name)
    }

    /// Files grouped by field name.
    pub fn files_by_field(&self) -> HashMap<&str, Vec<&FileDescriptor>> {
        let mut map: HashMap<&str, Vec<&FileDescriptor>> = HashMap::new();
        for file in &self.files {
            map.entry(file.field_name()).or_default().push(file);
        }
        map
    }

    /// The first value of the text field `field_name`.
    pub fn field(&self, field_name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.field_name == field_name)
            .map(FieldEntry::value)
    }

    /// Text fields as a map. A repeated name keeps its last value.
    pub fn field_map(&self) -> HashMap<&str, &str> {
        self.fields
            .iter()
            .map(|field| (field.field_name(), field.value()))
            .collect()
    }

    /// Deserializes the text field `field_name` as JSON.
    ///
    /// # Optional
    ///
    /// This requires the optional `json` feature to be enabled.
    #[cfg(feature = "json")]
    #[cfg_attr(nightly, doc(cfg(feature = "json")))]
    pub fn field_json<T: serde::de::DeserializeOwned>(&self, field_name: &str) -> crate::Result<Option<T>> {
        self.field(field_name)
            .map(|value| serde_json::from_str(value).map_err(crate::Error::DecodeJson))
            .transpose()
    }

    pub fn into_parts(self) -> (Vec<FileDescriptor>, Vec<FieldEntry>, Vec<PartMetadata>) {
        (self.files, self.fields, self.rejected)
    }
}

/// Accumulates parts as the engine finishes them.
#[derive(Debug, Default)]
pub(crate) struct Collector {
    result: ParseResult,
}

impl Collector {
    pub(crate) fn new() -> Collector {
        Collector::default()
    }

    pub(crate) fn push_file(&mut self, file: FileDescriptor) {
        self.result.files.push(file);
    }

    pub(crate) fn push_field(&mut self, field: FieldEntry) {
        self.result.fields.push(field);
    }

    pub(crate) fn push_rejected(&mut self, meta: PartMetadata) {
        self.result.rejected.push(meta);
    }

    pub(crate) fn stored_files(&self) -> &[FileDescriptor] {
        &self.result.files
    }

    /// Only called once the body's closing delimiter has been read.
    pub(crate) fn finish(self) -> ParseResult {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoredData;
    use bytes::Bytes;
    use http::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION};

    fn file(field_name: &'static str, index: usize) -> FileDescriptor {
        let mut headers = HeaderMap::new();
        let disposition = format!(r#"form-data; name="{}"; filename="f{}""#, field_name, index);
        headers.insert(CONTENT_DISPOSITION, HeaderValue::from_str(&disposition).unwrap());
        let meta = PartMetadata::from_headers(&headers, index).unwrap();
        FileDescriptor::new(&meta, 1, StoredData::Memory(Bytes::from_static(b"x")))
    }

    #[test]
    fn test_lookup() {
        let mut collector = Collector::new();
        collector.push_field(FieldEntry::new("name", "John"));
        collector.push_file(file("photos", 1));
        collector.push_field(FieldEntry::new("name", "Jane"));
        collector.push_file(file("photos", 3));
        collector.push_file(file("avatar", 4));

        let result = collector.finish();

        assert_eq!(result.field("name"), Some("John"));
        assert_eq!(result.field_map().get("name"), Some(&"Jane"));
        assert_eq!(result.field("missing"), None);

        assert_eq!(result.files_named("photos").count(), 2);
        assert_eq!(result.file("photos").map(FileDescriptor::original_file_name), Some("f1"));
        assert_eq!(result.files_by_field().get("avatar").map(Vec::len), Some(1));
        assert!(result.file("missing").is_none());
        assert!(result.rejected().is_empty());
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_field_json() {
        let mut collector = Collector::new();
        collector.push_field(FieldEntry::new("meta", r#"{"tags":["a","b"]}"#));
        collector.push_field(FieldEntry::new("bad", "{"));
        let result = collector.finish();

        let value: Option<serde_json::Value> = result.field_json("meta").unwrap();
        assert_eq!(value.unwrap()["tags"][1], "b");
        assert!(result.field_json::<serde_json::Value>("bad").is_err());
        assert_eq!(result.field_json::<serde_json::Value>("missing").unwrap(), None);
    }
}
