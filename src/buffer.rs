use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures_util::stream::Stream;

use crate::constants;

/// Bytes read ahead of the parser before it stops polling the source stream.
const READ_AHEAD: usize = 64 * 1024;

pub(crate) struct StreamBuffer<'r> {
    pub(crate) eof: bool,
    pub(crate) buf: BytesMut,
    pub(crate) stream: Pin<Box<dyn Stream<Item = crate::Result<Bytes>> + Send + 'r>>,
    pub(crate) whole_stream_size_limit: u64,
    pub(crate) stream_size_counter: u64,
    pub(crate) read_ahead: usize,
    pub(crate) waker_registered: bool,
}

impl<'r> StreamBuffer<'r> {
    pub fn new<S>(stream: S, whole_stream_size_limit: u64, boundary_len: usize) -> Self
    where
        S: Stream<Item = crate::Result<Bytes>> + Send + 'r,
    {
        StreamBuffer {
            eof: false,
            buf: BytesMut::new(),
            stream: Box::pin(stream),
            whole_stream_size_limit,
            stream_size_counter: 0,
            read_ahead: READ_AHEAD.max(boundary_len * 4),
            waker_registered: false,
        }
    }

    /// Pulls chunks from the source stream until it is pending, ends, or the
    /// buffer holds at least `read_ahead` bytes.
    ///
    /// `waker_registered` records whether the source stream returned
    /// `Pending` and will therefore wake the task itself.
    pub fn poll_stream(&mut self, cx: &mut Context<'_>) -> crate::Result<()> {
        self.waker_registered = false;

        if self.eof {
            return Ok(());
        }

        while self.buf.len() < self.read_ahead {
            match self.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(data))) => {
                    self.stream_size_counter += data.len() as u64;

                    if self.stream_size_counter > self.whole_stream_size_limit {
                        return Err(crate::Error::StreamSizeExceeded {
                            limit: self.whole_stream_size_limit,
                        });
                    }

                    log::trace!("polled chunk of {} bytes", data.len());
                    self.buf.extend_from_slice(&data)
                }
                Poll::Ready(Some(Err(err))) => return Err(err),
                Poll::Ready(None) => {
                    self.eof = true;
                    return Ok(());
                }
                Poll::Pending => {
                    self.waker_registered = true;
                    return Ok(());
                }
            }
        }

        Ok(())
    }

    /// Returns `Poll::Pending` for a caller that needs more data, waking the
    /// task right away when polling stopped at the read-ahead limit instead
    /// of at a pending source.
    pub fn pending<T>(&self, cx: &mut Context<'_>) -> Poll<T> {
        if !self.waker_registered {
            cx.waker().wake_by_ref();
        }
        Poll::Pending
    }

    /// Whether the buffer is full enough that waiting for more data would
    /// not help a search that already failed.
    pub fn is_saturated(&self) -> bool {
        self.buf.len() >= self.read_ahead
    }

    pub fn read_exact(&mut self, size: usize) -> Option<Bytes> {
        if size <= self.buf.len() {
            Some(self.buf.split_to(size).freeze())
        } else {
            None
        }
    }

    pub fn peek_exact(&self, size: usize) -> Option<&[u8]> {
        self.buf.get(..size)
    }

    pub fn read_until(&mut self, pattern: &[u8]) -> Option<Bytes> {
        memchr::memmem::find(&self.buf, pattern).map(|idx| self.buf.split_to(idx + pattern.len()).freeze())
    }

    /// Discards everything before `pattern`. Returns `true` once the buffer
    /// starts with it; otherwise drops all bytes that can no longer begin a
    /// match and returns `false`.
    pub fn skip_to(&mut self, pattern: &[u8]) -> bool {
        match memchr::memmem::find(&self.buf, pattern) {
            Some(idx) => {
                self.buf.advance(idx);
                true
            }
            None => {
                let keep = pattern.len().saturating_sub(1);
                let discard = self.buf.len().saturating_sub(keep);
                self.buf.advance(discard);
                false
            }
        }
    }

    /// Reads the next slice of the current part's body.
    ///
    /// Returns `(true, bytes)` with the last bytes of the part once the
    /// closing `\r\n--boundary` is found, leaving the buffer at `--boundary`.
    /// Returns `Ok(None)` when more data is needed.
    pub fn read_field_data(
        &mut self,
        boundary: &str,
        field_name: Option<&str>,
    ) -> crate::Result<Option<(bool, Bytes)>> {
        if self.buf.is_empty() {
            return if self.eof {
                Err(crate::Error::IncompleteFieldData {
                    field_name: field_name.map(str::to_owned),
                })
            } else {
                Ok(None)
            };
        }

        let boundary_deriv = format!("{}{}{}", constants::CRLF, constants::BOUNDARY_EXT, boundary);
        let b_len = boundary_deriv.len();

        match memchr::memmem::find(&self.buf, boundary_deriv.as_bytes()) {
            Some(idx) => {
                let bytes = self.buf.split_to(idx).freeze();

                // discard \r\n.
                self.buf.advance(constants::CRLF.len());

                Ok(Some((true, bytes)))
            }
            None if self.eof => Err(crate::Error::IncompleteFieldData {
                field_name: field_name.map(str::to_owned),
            }),
            None => {
                let buf_len = self.buf.len();
                let rem_boundary_part_max_len = b_len - 1;
                let rem_boundary_part_idx = buf_len.saturating_sub(rem_boundary_part_max_len);

                // A trailing `\r` may start the boundary; hold it back until
                // the next chunk settles it.
                match memchr::memrchr(constants::CR.as_bytes()[0], &self.buf[rem_boundary_part_idx..]) {
                    Some(rel_idx) => {
                        let idx = rel_idx + rem_boundary_part_idx;

                        if boundary_deriv.as_bytes().starts_with(&self.buf[idx..]) {
                            let bytes = self.buf.split_to(idx).freeze();

                            if bytes.is_empty() {
                                Ok(None)
                            } else {
                                Ok(Some((false, bytes)))
                            }
                        } else {
                            Ok(Some((false, self.read_full_buf())))
                        }
                    }
                    None => Ok(Some((false, self.read_full_buf()))),
                }
            }
        }
    }

    pub fn read_full_buf(&mut self) -> Bytes {
        self.buf.split_to(self.buf.len()).freeze()
    }
}

impl fmt::Debug for StreamBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("eof", &self.eof)
            .field("buffered", &self.buf.len())
            .field("stream_size_counter", &self.stream_size_counter)
            .finish()
    }
}
