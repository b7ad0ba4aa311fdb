use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{Stream, TryStreamExt};
use http::header::HeaderMap;
use spin::mutex::spin::SpinMutex as Mutex;
#[cfg(feature = "tokio-io")]
use {tokio::io::AsyncRead, tokio_util::io::ReaderStream};

use crate::buffer::StreamBuffer;
use crate::constants;
use crate::constraints::Constraints;
use crate::content_disposition::ContentDisposition;
use crate::helpers;
use crate::state::{MultipartState, StreamingStage};
use crate::Field;

/// Represents the implementation of `multipart/form-data` formatted data.
///
/// This will parse the source stream into [`Field`] instances via
/// [`next_field`](Multipart::next_field).
///
/// To maintain consistency in the underlying stream, this will not yield more
/// than one [`Field`] at a time. Dropping a `Field` is what allows the next
/// one to be read, so avoid leaking that type or anything which contains it.
///
/// # Examples
///
/// ```
/// use multer_upload::Multipart;
/// use bytes::Bytes;
/// use std::convert::Infallible;
/// use futures_util::stream::once;
///
/// # async fn run() {
/// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
/// let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
/// let mut multipart = Multipart::new(stream, "X-BOUNDARY");
///
/// while let Some(field) = multipart.next_field().await.unwrap() {
///     println!("Field: {:?}", field.text().await)
/// }
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
pub struct Multipart<'r> {
    state: Arc<Mutex<MultipartState<'r>>>,
}

impl<'r> Multipart<'r> {
    /// Construct a new `Multipart` instance with the given [`Bytes`] stream and
    /// the boundary.
    pub fn new<S, O, E, B>(stream: S, boundary: B) -> Self
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
        B: Into<String>,
    {
        Multipart::with_constraints(stream, boundary, Constraints::default())
    }

    /// Construct a new `Multipart` instance with the given [`Bytes`] stream,
    /// the boundary and some [`Constraints`].
    pub fn with_constraints<S, O, E, B>(stream: S, boundary: B, constraints: Constraints) -> Self
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
        B: Into<String>,
    {
        let stream = stream
            .map_ok(|b| b.into())
            .map_err(|err| crate::Error::StreamReadFailed(err.into()));

        let boundary = boundary.into();

        let state = MultipartState {
            buffer: StreamBuffer::new(stream, constraints.size_limit.whole_stream, boundary.len()),
            boundary,
            stage: StreamingStage::FindingFirstBoundary,
            next_field_idx: 0,
            curr_field_name: None,
            curr_field_size_limit: constraints.size_limit.per_field,
            curr_field_size_counter: 0,
            constraints,
        };

        Multipart {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Construct a new `Multipart` instance with the given [`AsyncRead`] reader
    /// and the boundary.
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    ///
    /// # Examples
    ///
    /// ```
    /// use multer_upload::Multipart;
    ///
    /// # async fn run() {
    /// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
    /// let reader = data.as_bytes();
    /// let mut multipart = Multipart::with_reader(reader, "X-BOUNDARY");
    ///
    /// while let Some(mut field) = multipart.next_field().await.unwrap() {
    ///     while let Some(chunk) = field.chunk().await.unwrap() {
    ///         println!("Chunk: {:?}", chunk);
    ///     }
    /// }
    /// # }
    /// # tokio::runtime::Runtime::new().unwrap().block_on(run());
    /// ```
    #[cfg(feature = "tokio-io")]
    #[cfg_attr(nightly, doc(cfg(feature = "tokio-io")))]
    pub fn with_reader<R, B>(reader: R, boundary: B) -> Self
    where
        R: AsyncRead + Unpin + Send + 'r,
        B: Into<String>,
    {
        let stream = ReaderStream::new(reader);
        Multipart::new(stream, boundary)
    }

    /// Construct a new `Multipart` instance with the given [`AsyncRead`]
    /// reader, the boundary and some [`Constraints`].
    ///
    /// # Optional
    ///
    /// This requires the optional `tokio-io` feature to be enabled.
    #[cfg(feature = "tokio-io")]
    #[cfg_attr(nightly, doc(cfg(feature = "tokio-io")))]
    pub fn with_reader_with_constraints<R, B>(reader: R, boundary: B, constraints: Constraints) -> Self
    where
        R: AsyncRead + Unpin + Send + 'r,
        B: Into<String>,
    {
        let stream = ReaderStream::new(reader);
        Multipart::with_constraints(stream, boundary, constraints)
    }

    /// Yields the next [`Field`] if available.
    ///
    /// Any previous `Field` must be dropped before calling this method or
    /// [`Multipart::next_field_with_idx()`] again, otherwise
    /// [`Error::LockFailure`](crate::Error::LockFailure) is returned.
    pub async fn next_field(&mut self) -> crate::Result<Option<Field<'r>>> {
        futures_util::future::poll_fn(|cx| self.poll_next_field(cx)).await
    }

    /// Yields the next [`Field`] with their positioning index as a tuple
    /// `(usize, Field)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use multer_upload::Multipart;
    /// use bytes::Bytes;
    /// use std::convert::Infallible;
    /// use futures_util::stream::once;
    ///
    /// # async fn run() {
    /// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
    /// let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
    /// let mut multipart = Multipart::new(stream, "X-BOUNDARY");
    ///
    /// while let Some((idx, field)) = multipart.next_field_with_idx().await.unwrap() {
    ///     println!("Index: {:?}, Content: {:?}", idx, field.text().await)
    /// }
    /// # }
    /// # tokio::runtime::Runtime::new().unwrap().block_on(run());
    /// ```
    pub async fn next_field_with_idx(&mut self) -> crate::Result<Option<(usize, Field<'r>)>> {
        self.next_field().await.map(|f| f.map(|field| (field.index(), field)))
    }

    /// Polls for the next [`Field`].
    pub fn poll_next_field(&mut self, cx: &mut Context<'_>) -> Poll<crate::Result<Option<Field<'r>>>> {
        // `&mut self` and a non-`Clone` `Field` leave at most one other owner
        // of the state; that owner must be gone before moving on.
        if Arc::strong_count(&self.state) != 1 {
            return Poll::Ready(Err(crate::Error::LockFailure));
        }

        let mut mutex_guard = match self.state.try_lock() {
            Some(lock) => lock,
            None => return Poll::Ready(Err(crate::Error::LockFailure)),
        };

        let state: &mut MultipartState<'r> = &mut mutex_guard;

        match poll_next_part(state, cx) {
            Poll::Ready(Ok(Some((headers, content_disposition, idx)))) => {
                drop(mutex_guard);
                let field = Field::new(Arc::clone(&self.state), headers, idx, content_disposition);
                Poll::Ready(Ok(Some(field)))
            }
            Poll::Ready(Ok(None)) => Poll::Ready(Ok(None)),
            Poll::Ready(Err(err)) => {
                state.stage = StreamingStage::Failed;
                Poll::Ready(Err(err))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    /// Whether no part has been read from this stream yet.
    pub(crate) fn is_fresh(&self) -> bool {
        match self.state.try_lock() {
            Some(state) => state.stage == StreamingStage::FindingFirstBoundary && state.next_field_idx == 0,
            None => false,
        }
    }
}

type PartHead = (HeaderMap, Option<ContentDisposition>, usize);

fn poll_next_part(state: &mut MultipartState<'_>, cx: &mut Context<'_>) -> Poll<crate::Result<Option<PartHead>>> {
    match state.stage {
        StreamingStage::Eof => return Poll::Ready(Ok(None)),
        StreamingStage::Failed => return Poll::Ready(Err(crate::Error::AlreadyConsumed)),
        // The previous field was dropped before its body was read.
        StreamingStage::ReadingFieldData => state.stage = StreamingStage::CleaningPrevFieldData,
        _ => {}
    }

    state.buffer.poll_stream(cx)?;

    if state.stage == StreamingStage::CleaningPrevFieldData {
        loop {
            match state
                .buffer
                .read_field_data(&state.boundary, state.curr_field_name.as_deref())?
            {
                Some((done, bytes)) => {
                    state.curr_field_size_counter += bytes.len() as u64;

                    if state.curr_field_size_counter > state.curr_field_size_limit {
                        return Poll::Ready(Err(crate::Error::FieldSizeExceeded {
                            limit: state.curr_field_size_limit,
                            field_name: state.curr_field_name.clone(),
                        }));
                    }

                    if done {
                        log::trace!(
                            "discarded {} unread bytes of field {:?}",
                            state.curr_field_size_counter,
                            state.curr_field_name
                        );
                        state.stage = StreamingStage::ReadingBoundary;
                        break;
                    }

                    state.buffer.poll_stream(cx)?;
                }
                None => return state.buffer.pending(cx),
            }
        }
    }

    if state.stage == StreamingStage::FindingFirstBoundary {
        let boundary_deriv = format!("{}{}", constants::BOUNDARY_EXT, state.boundary);

        if !state.buffer.skip_to(boundary_deriv.as_bytes()) {
            return if state.buffer.eof {
                Poll::Ready(Err(crate::Error::IncompleteStream))
            } else {
                state.buffer.pending(cx)
            };
        }

        state.stage = StreamingStage::ReadingBoundary;
    }

    if state.stage == StreamingStage::ReadingBoundary {
        let boundary_deriv = format!("{}{}", constants::BOUNDARY_EXT, state.boundary);

        let boundary_bytes = match state.buffer.read_exact(boundary_deriv.len()) {
            Some(bytes) => bytes,
            None => {
                return if state.buffer.eof {
                    Poll::Ready(Err(crate::Error::IncompleteStream))
                } else {
                    state.buffer.pending(cx)
                };
            }
        };

        if &boundary_bytes[..] != boundary_deriv.as_bytes() {
            return Poll::Ready(Err(crate::Error::IncompleteStream));
        }

        state.stage = StreamingStage::DeterminingBoundaryType;
    }

    if state.stage == StreamingStage::DeterminingBoundaryType {
        let ext_len = constants::BOUNDARY_EXT.len();

        let next_bytes = match state.buffer.peek_exact(ext_len) {
            Some(bytes) => bytes,
            None => {
                return if state.buffer.eof {
                    Poll::Ready(Err(crate::Error::IncompleteStream))
                } else {
                    state.buffer.pending(cx)
                };
            }
        };

        if next_bytes == constants::BOUNDARY_EXT.as_bytes() {
            state.stage = StreamingStage::Eof;
            log::debug!("reached the closing boundary after {} parts", state.next_field_idx);
            return Poll::Ready(Ok(None));
        }

        state.stage = StreamingStage::ReadingTransportPadding;
    }

    if state.stage == StreamingStage::ReadingTransportPadding {
        let line = match state.buffer.read_until(constants::CRLF.as_bytes()) {
            Some(line) => line,
            None => {
                return if state.buffer.eof || state.buffer.is_saturated() {
                    Poll::Ready(Err(crate::Error::IncompleteStream))
                } else {
                    state.buffer.pending(cx)
                };
            }
        };

        // Linear whitespace may sit between the boundary and its CRLF.
        let padding = &line[..line.len() - constants::CRLF.len()];
        if !padding.iter().all(|b| *b == b' ' || *b == b'\t') {
            return Poll::Ready(Err(crate::Error::IncompleteStream));
        }

        state.stage = StreamingStage::ReadingFieldHeaders;
    }

    if state.stage == StreamingStage::ReadingFieldHeaders {
        let header_bytes = if state.buffer.buf.starts_with(constants::CRLF.as_bytes()) {
            state.buffer.read_exact(constants::CRLF.len())
        } else {
            state.buffer.read_until(constants::CRLF_CRLF.as_bytes())
        };

        let header_bytes = match header_bytes {
            Some(bytes) => bytes,
            None => {
                return if state.buffer.eof || state.buffer.is_saturated() {
                    Poll::Ready(Err(crate::Error::IncompleteHeaders))
                } else {
                    state.buffer.pending(cx)
                };
            }
        };

        let mut headers = [httparse::EMPTY_HEADER; constants::MAX_HEADERS];

        let headers = match httparse::parse_headers(&header_bytes, &mut headers) {
            Ok(httparse::Status::Complete((_, raw_headers))) => helpers::convert_raw_headers_to_header_map(raw_headers)?,
            Ok(httparse::Status::Partial) => return Poll::Ready(Err(crate::Error::IncompleteHeaders)),
            Err(err) => return Poll::Ready(Err(crate::Error::ReadHeaderFailed(err))),
        };

        state.stage = StreamingStage::ReadingFieldData;

        let field_idx = state.next_field_idx;
        state.next_field_idx += 1;

        let content_disposition = ContentDisposition::parse(&headers);
        let field_name = content_disposition.as_ref().and_then(|cd| cd.field_name.clone());

        log::debug!("read headers of part #{} ({:?})", field_idx, field_name);

        if state.constraints.allowed_fields.is_some() {
            // A broken header block is reported as such, not as an unlisted field.
            if content_disposition.is_none() {
                return Poll::Ready(Err(crate::Error::MissingContentDisposition));
            }
            if field_name.as_deref().map_or(true, str::is_empty) {
                return Poll::Ready(Err(crate::Error::MissingFieldName));
            }
        }

        if !state.constraints.is_it_allowed(field_name.as_deref()) {
            return Poll::Ready(Err(crate::Error::UnknownField { field_name }));
        }

        state.curr_field_size_limit = state.constraints.size_limit.extract_size_limit_for(field_name.as_deref());
        state.curr_field_size_counter = 0;
        state.curr_field_name = field_name;

        return Poll::Ready(Ok(Some((headers, content_disposition, field_idx))));
    }

    state.buffer.pending(cx)
}

impl fmt::Debug for Multipart<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multipart").finish_non_exhaustive()
    }
}
