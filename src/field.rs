use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use futures_util::stream::{Stream, TryStreamExt};
use http::header::{self, HeaderMap};
#[cfg(feature = "json")]
use serde::de::DeserializeOwned;
use spin::mutex::spin::SpinMutex as Mutex;

use crate::content_disposition::ContentDisposition;
use crate::state::{MultipartState, StreamingStage};

/// A single part of a multipart stream, yielded by
/// [`Multipart::next_field`](crate::Multipart::next_field).
///
/// The body is read through the [`Stream`] implementation or the
/// [`chunk`](Field::chunk), [`bytes`](Field::bytes) and [`text`](Field::text)
/// helpers. Dropping a `Field` before its body is read is allowed: the rest
/// of the body is discarded by the next call to `next_field`.
///
/// # Warning About Leaks
///
/// The next part can't be read while a `Field` is alive, so do not keep it
/// around (or leak it) after you are done with it.
pub struct Field<'r> {
    state: Arc<Mutex<MultipartState<'r>>>,
    done: bool,
    headers: HeaderMap,
    content_disposition: Option<ContentDisposition>,
    content_type: Option<mime::Mime>,
    idx: usize,
}

impl<'r> Field<'r> {
    pub(crate) fn new(
        state: Arc<Mutex<MultipartState<'r>>>,
        headers: HeaderMap,
        idx: usize,
        content_disposition: Option<ContentDisposition>,
    ) -> Self {
        let content_type = parse_content_type(&headers);
        Field {
            state,
            headers,
            content_disposition,
            content_type,
            idx,
            done: false,
        }
    }

    /// The field name found in the
    /// [`Content-Disposition`](https://developer.mozilla.org/en-US/docs/Web/HTTP/Headers/Content-Disposition)
    /// header.
    pub fn name(&self) -> Option<&str> {
        self.content_disposition.as_ref()?.field_name.as_deref()
    }

    /// The file name found in the
    /// [`Content-Disposition`](https://developer.mozilla.org/en-US/docs/Web/HTTP/Headers/Content-Disposition)
    /// header.
    pub fn file_name(&self) -> Option<&str> {
        self.content_disposition.as_ref()?.file_name.as_deref()
    }

    /// Get the content type of the field.
    pub fn content_type(&self) -> Option<&mime::Mime> {
        self.content_type.as_ref()
    }

    /// Get a map of headers as [`HeaderMap`].
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get the index of this field in order they appeared in the stream.
    pub fn index(&self) -> usize {
        self.idx
    }

    /// Get the full data of the field as [`Bytes`].
    pub async fn bytes(mut self) -> crate::Result<Bytes> {
        let mut buf = BytesMut::new();

        while let Some(bytes) = self.chunk().await? {
            buf.extend_from_slice(&bytes);
        }

        Ok(buf.freeze())
    }

    /// Stream a chunk of the field data.
    ///
    /// When the field data has been exhausted, this will return [`None`].
    pub async fn chunk(&mut self) -> crate::Result<Option<Bytes>> {
        self.try_next().await
    }

    /// Try to deserialize the field data as JSON.
    #[cfg(feature = "json")]
    #[cfg_attr(nightly, doc(cfg(feature = "json")))]
    pub async fn json<T: DeserializeOwned>(self) -> crate::Result<T> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(crate::Error::DecodeJson)
    }

    /// Get the full field data as text.
    ///
    /// The charset is taken from the field's `Content-Type`, falling back to
    /// `utf-8`. Invalid byte sequences are replaced.
    pub async fn text(self) -> crate::Result<String> {
        self.text_with_charset("utf-8").await
    }

    /// Get the full field data as text given a specific encoding.
    pub async fn text_with_charset(self, default_encoding: &str) -> crate::Result<String> {
        let encoding = self.encoding(default_encoding);
        let bytes = self.bytes().await?;
        Ok(decode_text(encoding, &bytes))
    }

    pub(crate) fn encoding(&self, default_encoding: &str) -> &'static Encoding {
        let encoding_name = self
            .content_type()
            .and_then(|mime| mime.get_param(mime::CHARSET))
            .map(|charset| charset.as_str())
            .unwrap_or(default_encoding);

        Encoding::for_label(encoding_name.as_bytes()).unwrap_or(UTF_8)
    }
}

pub(crate) fn decode_text(encoding: &'static Encoding, bytes: &[u8]) -> String {
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

fn parse_content_type(headers: &HeaderMap) -> Option<mime::Mime> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.parse::<mime::Mime>().ok())
}

impl<'r> Stream for Field<'r> {
    type Item = crate::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.done {
            return Poll::Ready(None);
        }

        let mut mutex_guard = match this.state.try_lock() {
            Some(lock) => lock,
            None => {
                this.done = true;
                return Poll::Ready(Some(Err(crate::Error::LockFailure)));
            }
        };

        let state: &mut MultipartState<'r> = &mut mutex_guard;

        if let Err(err) = state.buffer.poll_stream(cx) {
            state.stage = StreamingStage::Failed;
            this.done = true;
            return Poll::Ready(Some(Err(err)));
        }

        match state
            .buffer
            .read_field_data(&state.boundary, state.curr_field_name.as_deref())
        {
            Ok(Some((done, bytes))) => {
                state.curr_field_size_counter += bytes.len() as u64;

                if state.curr_field_size_counter > state.curr_field_size_limit {
                    state.stage = StreamingStage::Failed;
                    this.done = true;
                    return Poll::Ready(Some(Err(crate::Error::FieldSizeExceeded {
                        limit: state.curr_field_size_limit,
                        field_name: state.curr_field_name.clone(),
                    })));
                }

                if done {
                    state.stage = StreamingStage::ReadingBoundary;
                    this.done = true;

                    if bytes.is_empty() {
                        return Poll::Ready(None);
                    }
                }

                Poll::Ready(Some(Ok(bytes)))
            }
            Ok(None) => state.buffer.pending(cx),
            Err(err) => {
                state.stage = StreamingStage::Failed;
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
        }
    }
}

impl fmt::Debug for Field<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name())
            .field("file_name", &self.file_name())
            .field("content_type", &self.content_type)
            .field("idx", &self.idx)
            .field("done", &self.done)
            .finish()
    }
}
