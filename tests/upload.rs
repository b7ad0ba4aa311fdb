use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, Stream, StreamExt};
use multer_upload::{
    DiskStorage, Error, ErrorKind, FieldSpec, Limits, Multer, MultipartOptions, StorageKind,
};

const CONTENT_TYPE: &str = "multipart/form-data; boundary=X-BOUNDARY";

fn byte_stream(data: Vec<u8>) -> impl Stream<Item = multer_upload::Result<Bytes>> {
    stream::iter(data.into_iter().map(|b| multer_upload::Result::Ok(Bytes::copy_from_slice(&[b]))))
}

fn field_part(name: &str, value: &str) -> String {
    format!(
        "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
        name, value
    )
}

fn file_part(name: &str, file_name: &str, content: &str) -> String {
    format!(
        "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: text/plain\r\n\r\n{}\r\n",
        name, file_name, content
    )
}

fn body(parts: &[String]) -> Vec<u8> {
    let mut body = parts.concat();
    body.push_str("--X-BOUNDARY--\r\n");
    body.into_bytes()
}

fn dir_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|it| it.count()).unwrap_or(0)
}

#[tokio::test]
async fn test_field_and_file() {
    let data = body(&[field_part("name", "John"), file_part("avatar", "a.txt", "hi")]);

    let result = Multer::any(MultipartOptions::new())
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap();

    assert_eq!(result.fields().len(), 1);
    assert_eq!(result.fields()[0].field_name(), "name");
    assert_eq!(result.fields()[0].value(), "John");

    assert_eq!(result.files().len(), 1);
    let file = &result.files()[0];
    assert_eq!(file.field_name(), "avatar");
    assert_eq!(file.original_file_name(), "a.txt");
    assert_eq!(file.content_type(), &mime::TEXT_PLAIN);
    assert_eq!(file.size(), 2);
    assert_eq!(file.storage_kind(), StorageKind::Memory);
    assert_eq!(file.buffer(), Some(&Bytes::from_static(b"hi")));
}

#[tokio::test]
async fn test_part_count_matches_result() {
    let data = body(&[
        field_part("a", "1"),
        file_part("f", "one.txt", "1"),
        field_part("b", "2"),
        file_part("f", "skip.exe", "MZ"),
        file_part("g", "two.txt", "22"),
        field_part("c", ""),
    ]);

    let options = MultipartOptions::new().filter(|meta| !meta.file_name().unwrap_or_default().ends_with(".exe"));
    let result = Multer::any(options)
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap();

    assert_eq!(result.files().len() + result.fields().len() + result.rejected().len(), 6);
    assert_eq!(result.files().len(), 2);
    assert_eq!(result.fields().len(), 3);
    assert_eq!(result.field("c"), Some(""));

    assert_eq!(result.rejected().len(), 1);
    assert_eq!(result.rejected()[0].file_name(), Some("skip.exe"));
    assert_eq!(result.rejected()[0].index(), 3);

    let names: Vec<&str> = result.files().iter().map(|f| f.original_file_name()).collect();
    assert_eq!(names, ["one.txt", "two.txt"]);
}

#[tokio::test]
async fn test_file_size_limit_boundary() {
    let limits = Limits::new().max_file_size(5);
    let multer = Multer::any(MultipartOptions::new().limits(limits));

    let exact = body(&[file_part("f", "a.txt", "12345")]);
    let result = multer.parse_request(CONTENT_TYPE, byte_stream(exact)).await.unwrap();
    assert_eq!(result.files()[0].size(), 5);

    let over = body(&[file_part("f", "a.txt", "123456")]);
    let err = multer.parse_request(CONTENT_TYPE, byte_stream(over)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FileTooLarge);
    assert_eq!(err.status_code(), http::StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(
        err,
        Error::FileTooLarge {
            limit: 5,
            field_name: "f".to_owned()
        }
    );
}

#[tokio::test]
async fn test_too_many_files_aborts() {
    let data = body(&[
        file_part("f", "1.txt", "1"),
        file_part("f", "2.txt", "2"),
        file_part("f", "3.txt", "3"),
    ]);

    let multer = Multer::any(MultipartOptions::new().limits(Limits::new().max_files(2)));
    let err = multer.parse_request(CONTENT_TYPE, byte_stream(data)).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TooManyFiles);
    assert_eq!(
        err,
        Error::TooManyFiles {
            limit: 2,
            field_name: None
        }
    );
}

#[tokio::test]
async fn test_field_limits() {
    let data = body(&[field_part("a", "abc"), field_part("b", "abcd")]);
    let multer = Multer::none(MultipartOptions::new().limits(Limits::new().max_field_size(3)));
    let err = multer.parse_request(CONTENT_TYPE, byte_stream(data)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FieldTooLarge);

    let data = body(&[field_part("a", "1"), field_part("b", "2"), field_part("c", "3")]);
    let multer = Multer::none(MultipartOptions::new().limits(Limits::new().max_field_count(2)));
    let err = multer.parse_request(CONTENT_TYPE, byte_stream(data)).await.unwrap_err();
    assert_eq!(err, Error::TooManyFields { limit: 2 });

    let data = body(&[field_part("a", "1"), file_part("f", "x.txt", "2")]);
    let multer = Multer::any(MultipartOptions::new().limits(Limits::new().max_parts(1)));
    let err = multer.parse_request(CONTENT_TYPE, byte_stream(data)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TooManyParts);
}

#[tokio::test]
async fn test_total_size_limit() {
    let data = body(&[field_part("a", "0123456789"), file_part("f", "x.txt", "0123456789")]);
    let multer = Multer::any(MultipartOptions::new().limits(Limits::new().max_total_size(64)));
    let err = multer.parse_request(CONTENT_TYPE, byte_stream(data)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StreamSizeExceeded);
}

#[tokio::test]
async fn test_parse_consumed_stream_fails() {
    let data = body(&[field_part("name", "John")]);
    let multer = Multer::any(MultipartOptions::new());
    let mut multipart = multer.multipart(byte_stream(data), "X-BOUNDARY");

    let result = multer.parse(&mut multipart).await.unwrap();
    assert_eq!(result.field("name"), Some("John"));

    assert_eq!(multer.parse(&mut multipart).await.unwrap_err(), Error::AlreadyConsumed);
}

#[tokio::test]
async fn test_parse_partially_read_stream_fails() {
    let data = body(&[field_part("a", "1"), field_part("b", "2")]);
    let multer = Multer::any(MultipartOptions::new());
    let mut multipart = multer.multipart(byte_stream(data), "X-BOUNDARY");

    let field = multipart.next_field().await.unwrap().unwrap();
    drop(field);

    let err = multer.parse(&mut multipart).await.unwrap_err();
    assert_eq!(err, Error::AlreadyConsumed);
    assert_eq!(err.kind(), ErrorKind::Usage);
}

#[tokio::test]
async fn test_missing_terminal_boundary_is_malformed() {
    let data = format!("{}--X-BOUNDARY", field_part("a", "1")).into_bytes();
    let err = Multer::any(MultipartOptions::new())
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Malformed);
    assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_truncated_file_body() {
    let data = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n\r\nhalf a fi".to_vec();
    let err = Multer::any(MultipartOptions::new())
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TruncatedBody);
}

#[tokio::test]
async fn test_invalid_part_headers() {
    let data = b"--X-BOUNDARY\r\nContent-Type: text/plain\r\n\r\nvalue\r\n--X-BOUNDARY--\r\n".to_vec();
    let err = Multer::any(MultipartOptions::new())
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap_err();
    assert_eq!(err, Error::MissingContentDisposition);
    assert_eq!(err.kind(), ErrorKind::InvalidPartHeader);

    let data = b"--X-BOUNDARY\r\nContent-Disposition: form-data; filename=\"a.txt\"\r\n\r\nvalue\r\n--X-BOUNDARY--\r\n".to_vec();
    let err = Multer::any(MultipartOptions::new())
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap_err();
    assert_eq!(err, Error::MissingFieldName);
}

#[tokio::test]
async fn test_bad_content_type() {
    let multer = Multer::any(MultipartOptions::new());

    let err = multer
        .parse_request("application/json", byte_stream(Vec::new()))
        .await
        .unwrap_err();
    assert_eq!(err, Error::NoMultipart);
    assert_eq!(err.kind(), ErrorKind::Malformed);

    let err = multer
        .parse_request("multipart/form-data", byte_stream(Vec::new()))
        .await
        .unwrap_err();
    assert_eq!(err, Error::NoBoundary);
}

#[tokio::test]
async fn test_selections() {
    let data = || body(&[field_part("note", "x"), file_part("avatar", "a.txt", "a")]);

    let result = Multer::single("avatar", MultipartOptions::new())
        .parse_request(CONTENT_TYPE, byte_stream(data()))
        .await
        .unwrap();
    assert_eq!(result.file("avatar").map(|f| f.size()), Some(1));

    let err = Multer::single("photo", MultipartOptions::new())
        .parse_request(CONTENT_TYPE, byte_stream(data()))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::UnexpectedFile {
            field_name: "avatar".to_owned()
        }
    );

    let err = Multer::none(MultipartOptions::new())
        .parse_request(CONTENT_TYPE, byte_stream(data()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedFile);

    let two = body(&[file_part("avatar", "1.txt", "1"), file_part("avatar", "2.txt", "2")]);
    let err = Multer::single("avatar", MultipartOptions::new())
        .parse_request(CONTENT_TYPE, byte_stream(two))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::TooManyFiles {
            limit: 1,
            field_name: Some("avatar".to_owned())
        }
    );
}

#[tokio::test]
async fn test_array_and_fields_selection() {
    let data = body(&[
        file_part("photos", "1.txt", "1"),
        file_part("photos", "2.txt", "2"),
        file_part("doc", "d.txt", "d"),
    ]);

    let result = Multer::fields(
        vec![FieldSpec::new("photos").max_count(2), FieldSpec::new("doc").max_count(1)],
        MultipartOptions::new(),
    )
    .parse_request(CONTENT_TYPE, byte_stream(data.clone()))
    .await
    .unwrap();

    let grouped = result.files_by_field();
    assert_eq!(grouped["photos"].len(), 2);
    assert_eq!(grouped["doc"].len(), 1);

    let err = Multer::array("photos", Some(2), MultipartOptions::new())
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedFile);
}

#[tokio::test]
async fn test_allowed_fields() {
    let data = body(&[field_part("name", "John"), field_part("admin", "true")]);
    let options = MultipartOptions::new().allowed_fields(vec!["name"]);

    let err = Multer::none(options)
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::UnknownField {
            field_name: Some("admin".to_owned())
        }
    );
}

#[tokio::test]
async fn test_allowed_fields_reports_broken_part_headers() {
    let options = || MultipartOptions::new().allowed_fields(vec!["name"]);

    let data = b"--X-BOUNDARY\r\nContent-Type: text/plain\r\n\r\nvalue\r\n--X-BOUNDARY--\r\n".to_vec();
    let err = Multer::none(options())
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap_err();
    assert_eq!(err, Error::MissingContentDisposition);
    assert_eq!(err.kind(), ErrorKind::InvalidPartHeader);

    let data = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"\"\r\n\r\nvalue\r\n--X-BOUNDARY--\r\n".to_vec();
    let err = Multer::none(options())
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap_err();
    assert_eq!(err, Error::MissingFieldName);
}

#[tokio::test]
async fn test_undecodable_extended_filename_is_still_a_file() {
    let part = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"f\"; filename*=UTF-8''evil%zz.exe\r\n\r\nMZpayload\r\n";
    let data = body(&[part.to_owned()]);

    let err = Multer::none(MultipartOptions::new())
        .parse_request(CONTENT_TYPE, byte_stream(data.clone()))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        Error::UnexpectedFile {
            field_name: "f".to_owned()
        }
    );

    let result = Multer::any(MultipartOptions::new().filter(|_| false))
        .parse_request(CONTENT_TYPE, byte_stream(data.clone()))
        .await
        .unwrap();
    assert!(result.files().is_empty());
    assert!(result.fields().is_empty());
    assert_eq!(result.rejected().len(), 1);

    let err = Multer::any(MultipartOptions::new().limits(Limits::new().max_files(0)))
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TooManyFiles);
}

#[tokio::test]
async fn test_escaped_quote_in_file_name() {
    let data = body(&[file_part("doc", "a\\\"b.txt", "x")]);

    let result = Multer::any(MultipartOptions::new())
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap();
    assert_eq!(result.files()[0].original_file_name(), "a\"b.txt");
}

#[tokio::test]
async fn test_field_charset() {
    let mut data = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"city\"\r\nContent-Type: text/plain; charset=iso-8859-1\r\n\r\nMontr".to_vec();
    data.push(0xE9);
    data.extend_from_slice(b"al\r\n--X-BOUNDARY--\r\n");

    let result = Multer::none(MultipartOptions::new())
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap();
    assert_eq!(result.field("city"), Some("Montr\u{e9}al"));
}

#[tokio::test]
async fn test_concurrent_parses_have_separate_limits() {
    let multer = Multer::any(MultipartOptions::new().limits(Limits::new().max_files(1)));
    let first = body(&[file_part("f", "1.txt", "one")]);
    let second = body(&[file_part("f", "2.txt", "two")]);

    let (a, b) = tokio::join!(
        multer.parse_request(CONTENT_TYPE, byte_stream(first)),
        multer.parse_request(CONTENT_TYPE, byte_stream(second)),
    );

    assert_eq!(a.unwrap().files()[0].buffer(), Some(&Bytes::from_static(b"one")));
    assert_eq!(b.unwrap().files()[0].buffer(), Some(&Bytes::from_static(b"two")));
}

#[tokio::test]
async fn test_disk_storage_content() {
    let dir = tempfile::tempdir().unwrap();
    let data = body(&[field_part("name", "John"), file_part("doc", "report.txt", "line 1\r\nline 2")]);

    let result = Multer::any(MultipartOptions::new().dest(dir.path()))
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap();

    let file = result.file("doc").unwrap();
    assert_eq!(file.storage_kind(), StorageKind::Disk);
    assert_eq!(file.destination(), Some(dir.path()));
    assert_eq!(file.size(), 14);
    assert_ne!(file.file_name(), Some("report.txt"));
    assert_eq!(std::fs::read(file.path().unwrap()).unwrap(), b"line 1\r\nline 2");
}

#[tokio::test]
async fn test_disk_partial_file_removed_on_oversize() {
    let dir = tempfile::tempdir().unwrap();
    let data = body(&[
        file_part("a", "kept.txt", "ok"),
        file_part("b", "big.txt", "way too large"),
    ]);

    let options = MultipartOptions::new()
        .storage(DiskStorage::new(dir.path()))
        .limits(Limits::new().max_file_size(4));
    let err = Multer::any(options)
        .parse_request(CONTENT_TYPE, byte_stream(data))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FileTooLarge);
    // Files completed before the failure stay; the oversized one is gone.
    assert_eq!(dir_entries(dir.path()), 1);
}

#[tokio::test]
async fn test_disk_partial_file_removed_on_stream_error() {
    let dir = tempfile::tempdir().unwrap();
    let mut head = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n\r\n".to_vec();
    // More than the tokenizer reads ahead, so the file is open when the error lands.
    head.extend(std::iter::repeat(b'x').take(200_000));
    let chunks: Vec<multer_upload::Result<Bytes>> = head.chunks(1024).map(|c| Ok(Bytes::copy_from_slice(c))).collect();
    let broken = stream::iter(chunks).chain(stream::iter(vec![Err(Error::StreamReadFailed("connection reset".into()))]));

    let err = Multer::any(MultipartOptions::new().dest(dir.path()))
        .parse_request(CONTENT_TYPE, broken)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Stream);
    assert_eq!(dir_entries(dir.path()), 0);
}

#[tokio::test]
async fn test_parse_until_aborts_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let head = b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"f\"; filename=\"a.txt\"\r\n\r\nstalled upload".to_vec();
    let stalled = byte_stream(head).chain(stream::pending());

    let multer = Multer::any(MultipartOptions::new().dest(dir.path()));
    let mut multipart = multer.multipart(stalled, "X-BOUNDARY");

    let err = multer
        .parse_until(&mut multipart, tokio::time::sleep(Duration::from_millis(50)))
        .await
        .unwrap_err();

    assert_eq!(err, Error::Aborted);
    assert_eq!(dir_entries(dir.path()), 0);
    assert_eq!(multer.parse(&mut multipart).await.unwrap_err(), Error::AlreadyConsumed);
}
