use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::future::{self, Either};
use futures_util::stream::{Stream, TryStream};

use crate::collector::{Collector, FieldEntry, ParseResult};
use crate::field::decode_text;
use crate::selection::{FieldSpec, Selection, SelectionTracker};
use crate::{Field, LimitEnforcer, Multipart, MultipartOptions, PartMetadata};

/// Parses a multipart body into stored files and decoded text fields.
///
/// An engine is built once from [`MultipartOptions`] and can run any number
/// of parses, concurrently or not; every parse keeps its own counters. The
/// constructors mirror the usual upload shapes: [`single`](Multer::single),
/// [`array`](Multer::array), [`fields`](Multer::fields), [`any`](Multer::any)
/// and [`none`](Multer::none).
///
/// A parse either returns everything or fails with the first error. Too many
/// files abort the parse; the extra files are never silently dropped.
///
/// # Examples
///
/// ```
/// use multer_upload::{Limits, Multer, MultipartOptions};
/// # use bytes::Bytes;
/// # use std::convert::Infallible;
/// # use futures_util::stream::once;
///
/// # async fn run() {
/// # let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nJohn\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"a.txt\"\r\n\r\nhi\r\n--X-BOUNDARY--\r\n";
/// # let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
/// let multer = Multer::single("avatar", MultipartOptions::new().limits(Limits::new().max_file_size(1024)));
///
/// let result = multer
///     .parse_request("multipart/form-data; boundary=X-BOUNDARY", stream)
///     .await
///     .unwrap();
///
/// assert_eq!(result.field("name"), Some("John"));
/// assert_eq!(result.file("avatar").unwrap().size(), 2);
/// # }
/// # tokio::runtime::Runtime::new().unwrap().block_on(run());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Multer {
    options: MultipartOptions,
}

impl Multer {
    pub fn new(options: MultipartOptions) -> Multer {
        Multer { options }
    }

    /// Accepts at most one file, on `field_name`.
    pub fn single<N: Into<String>>(field_name: N, options: MultipartOptions) -> Multer {
        Multer::new(options.selection(Selection::Single(field_name.into())))
    }

    /// Accepts files on `field_name`, at most `max_count` of them when given.
    pub fn array<N: Into<String>>(field_name: N, max_count: Option<usize>, options: MultipartOptions) -> Multer {
        Multer::new(options.selection(Selection::Array {
            name: field_name.into(),
            max_count,
        }))
    }

    /// Accepts files on each listed field, up to that field's cap.
    pub fn fields<I>(specs: I, options: MultipartOptions) -> Multer
    where
        I: IntoIterator<Item = FieldSpec>,
    {
        Multer::new(options.selection(Selection::Fields(specs.into_iter().collect())))
    }

    /// Accepts files on any field.
    pub fn any(options: MultipartOptions) -> Multer {
        Multer::new(options.selection(Selection::Any))
    }

    /// Accepts text fields only.
    pub fn none(options: MultipartOptions) -> Multer {
        Multer::new(options.selection(Selection::None))
    }

    pub fn options(&self) -> &MultipartOptions {
        &self.options
    }

    /// Wraps `stream` in a [`Multipart`] carrying this engine's constraints.
    pub fn multipart<'r, S, O, E, B>(&self, stream: S, boundary: B) -> Multipart<'r>
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
        B: Into<String>,
    {
        Multipart::with_constraints(stream, boundary, self.options.constraints())
    }

    /// Parses a request body given its `Content-Type` header value.
    ///
    /// # Errors
    ///
    /// Besides any parse error, fails with [`Error::NoMultipart`](crate::Error::NoMultipart)
    /// or [`Error::NoBoundary`](crate::Error::NoBoundary) when the header does
    /// not describe a multipart/form-data body.
    pub async fn parse_request<'r, S, O, E>(&self, content_type: &str, stream: S) -> crate::Result<ParseResult>
    where
        S: Stream<Item = Result<O, E>> + Send + 'r,
        O: Into<Bytes> + 'r,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + 'r,
    {
        let boundary = crate::parse_boundary(content_type)?;
        let mut multipart = self.multipart(stream, boundary);
        self.parse(&mut multipart).await
    }

    /// Parses every part of `multipart`.
    ///
    /// The body must not have been read from before; a second parse of the
    /// same `Multipart` fails with
    /// [`Error::AlreadyConsumed`](crate::Error::AlreadyConsumed).
    ///
    /// Files stored before a failure are not removed: they are logged and left
    /// to the caller. Files still being written are removed.
    pub async fn parse(&self, multipart: &mut Multipart<'_>) -> crate::Result<ParseResult> {
        if !multipart.is_fresh() {
            return Err(crate::Error::AlreadyConsumed);
        }

        let mut collector = Collector::new();

        match self.drive(multipart, &mut collector).await {
            Ok(()) => {
                let result = collector.finish();
                log::debug!(
                    "parsed {} files and {} fields ({} rejected)",
                    result.files().len(),
                    result.fields().len(),
                    result.rejected().len()
                );
                Ok(result)
            }
            Err(err) => {
                for file in collector.stored_files() {
                    if let Some(path) = file.path() {
                        log::warn!("parse failed, leaving stored upload {}", path.display());
                    }
                }
                Err(err)
            }
        }
    }

    /// Like [`parse`](Multer::parse), but gives up with
    /// [`Error::Aborted`](crate::Error::Aborted) as soon as `cancel` completes,
    /// for instance when the client disconnects.
    pub async fn parse_until<F>(&self, multipart: &mut Multipart<'_>, cancel: F) -> crate::Result<ParseResult>
    where
        F: Future<Output = ()>,
    {
        let parse = self.parse(multipart);
        futures_util::pin_mut!(parse);
        futures_util::pin_mut!(cancel);

        match future::select(parse, cancel).await {
            Either::Left((result, _)) => result,
            Either::Right(((), _)) => {
                log::warn!("multipart parse aborted");
                Err(crate::Error::Aborted)
            }
        }
    }

    async fn drive(&self, multipart: &mut Multipart<'_>, collector: &mut Collector) -> crate::Result<()> {
        let mut enforcer = LimitEnforcer::new(self.options.limits);
        let mut selection = SelectionTracker::new(&self.options.selection);

        while let Some(mut field) = multipart.next_field().await? {
            enforcer.begin_part()?;

            let meta = PartMetadata::from_field(&field)?;
            if !self.options.is_allowed(meta.field_name()) {
                return Err(crate::Error::UnknownField {
                    field_name: Some(meta.field_name().to_owned()),
                });
            }

            if meta.is_file() {
                selection.check(meta.field_name())?;

                if !self.options.accepts_file(&meta) {
                    log::debug!("filter rejected {:?} on field {}", meta.file_name(), meta.field_name());
                    // The next call to `next_field` skips the unread body.
                    drop(field);
                    collector.push_rejected(meta);
                    continue;
                }

                enforcer.begin_file()?;
                selection.accept(meta.field_name());

                let body = LimitedBody {
                    field: &mut field,
                    enforcer: &mut enforcer,
                    field_name: meta.field_name(),
                    done: false,
                };
                let file = self.options.storage.store(&meta, Box::pin(body)).await?;
                collector.push_file(file);
            } else {
                enforcer.begin_field()?;

                let encoding = field.encoding("utf-8");
                let mut buf = BytesMut::new();
                while let Some(chunk) = field.chunk().await? {
                    enforcer.record_field_chunk(meta.field_name(), chunk.len())?;
                    buf.extend_from_slice(&chunk);
                }

                log::trace!("field {} is {} bytes", meta.field_name(), buf.len());
                collector.push_field(FieldEntry::new(meta.field_name(), decode_text(encoding, &buf)));
            }
        }

        Ok(())
    }
}

/// A file part's body, counted against the file size limits as it is read.
struct LimitedBody<'a, 'r> {
    field: &'a mut Field<'r>,
    enforcer: &'a mut LimitEnforcer,
    field_name: &'a str,
    done: bool,
}

impl Stream for LimitedBody<'_, '_> {
    type Item = crate::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut *this.field).try_poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => match this.enforcer.record_file_chunk(this.field_name, chunk.len()) {
                Ok(()) => Poll::Ready(Some(Ok(chunk))),
                Err(err) => {
                    this.done = true;
                    Poll::Ready(Some(Err(err)))
                }
            },
            Poll::Ready(Some(Err(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
