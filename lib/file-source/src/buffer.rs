use std::io;
use std::ops::Range;

use memchr::memchr;
use snafu::Snafu;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Error returned by [`LineReader::read_until`].
#[derive(Debug, Snafu)]
pub enum ReadError {
    /// The underlying stream hit end-of-file before a delimiter was seen. Any
    /// partial bytes stay buffered and will prefix the next record once more
    /// data arrives.
    #[snafu(display("record incomplete: end of stream before delimiter"))]
    Incomplete,
    /// The buffer is full and contains no delimiter. The caller may [`grow`]
    /// the buffer and retry without losing data.
    ///
    /// [`grow`]: LineReader::grow
    #[snafu(display("read buffer full without delimiter"))]
    Overflow,
    #[snafu(display("read failed: {source}"))]
    Read { source: io::Error },
}

/// A buffered line reader that yields complete records as views into its own
/// buffer, without copying.
///
/// The reader maintains a `(pos, end)` window over a single fixed-size
/// allocation. `read_until` searches the window for the delimiter; when none
/// is buffered it compacts the window to the front and issues single reads
/// into the free tail until a delimiter shows up, the buffer fills, or the
/// stream errors out. Views returned by `read_until` are valid only until the
/// next call; callers that need persistence must copy.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    end: usize,
    last_error: Option<io::ErrorKind>,
}

impl<R> LineReader<R> {
    pub fn new(inner: R, buf_size: usize) -> Self {
        Self {
            inner,
            buf: vec![0; buf_size],
            pos: 0,
            end: 0,
            last_error: None,
        }
    }

    /// Swap the underlying byte source and zero the window. The buffer
    /// allocation is preserved. Returns the previous source.
    pub fn reset(&mut self, inner: R) -> R {
        self.clear();
        std::mem::replace(&mut self.inner, inner)
    }

    /// Zero the window and forget any remembered error, keeping the current
    /// source and the buffer allocation.
    pub fn clear(&mut self) {
        self.pos = 0;
        self.end = 0;
        self.last_error = None;
    }

    /// Enlarge the buffer to `new_size` bytes, carrying buffered data over.
    /// No-op when the buffer is already at least that large.
    pub fn grow(&mut self, new_size: usize) {
        if self.buf.len() >= new_size {
            return;
        }
        let mut buf = vec![0; new_size];
        let len = self.len();
        buf[..len].copy_from_slice(&self.buf[self.pos..self.end]);
        self.pos = 0;
        self.end = len;
        self.buf = buf;
    }

    /// Bytes buffered but not yet returned as part of a record.
    pub fn unread(&self) -> &[u8] {
        &self.buf[self.pos..self.end]
    }

    /// Empty the window, returning how many buffered bytes were thrown away.
    pub fn drain(&mut self) -> usize {
        let n = self.len();
        self.pos = 0;
        self.end = 0;
        n
    }

    pub fn len(&self) -> usize {
        self.end - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.pos
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Resolve a span produced by [`fill_until`] into bytes. The span is
    /// only meaningful until the next `fill_until`/`read_until` call.
    ///
    /// [`fill_until`]: LineReader::fill_until
    pub(crate) fn view(&self, span: Range<usize>) -> &[u8] {
        &self.buf[span]
    }

    /// Consume a delimiter-terminated record out of the window, delimiter
    /// included, returning its span. When the record ends exactly at `end`
    /// the window resets to the buffer start so the next read has the full
    /// buffer available; the span stays valid since the bytes themselves
    /// are untouched.
    fn take(&mut self, delim_at: usize) -> Range<usize> {
        let start = self.pos;
        let end = delim_at + 1;
        if end == self.end {
            self.pos = 0;
            self.end = 0;
        } else {
            self.pos = end;
        }
        start..end
    }
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Return the next record ending in `delim`, delimiter included, as a
    /// view into the internal buffer.
    pub async fn read_until(&mut self, delim: u8) -> Result<&[u8], ReadError> {
        let span = self.fill_until(delim).await?;
        Ok(&self.buf[span])
    }

    /// The core of [`read_until`]: advance past the next record and return
    /// its span rather than the bytes, so callers can release the borrow
    /// between consuming the record and looking at it.
    ///
    /// [`read_until`]: LineReader::read_until
    pub(crate) async fn fill_until(&mut self, delim: u8) -> Result<Range<usize>, ReadError> {
        if self.end != self.pos {
            if let Some(i) = memchr(delim, &self.buf[self.pos..self.end]) {
                let at = self.pos + i;
                return Ok(self.take(at));
            }
        }

        // No buffered delimiter; compact and read into the free tail.
        if self.pos != 0 {
            self.buf.copy_within(self.pos..self.end, 0);
            self.end -= self.pos;
            self.pos = 0;
        }

        if let Some(kind) = self.last_error {
            return Err(ReadError::Read {
                source: kind.into(),
            });
        }

        loop {
            if self.end == self.buf.len() {
                // Window kept intact so the reader can be enlarged with grow.
                return Err(ReadError::Overflow);
            }
            match self.inner.read(&mut self.buf[self.end..]).await {
                Ok(0) => return Err(ReadError::Incomplete),
                Ok(n) => {
                    let fresh = self.end;
                    self.end += n;
                    if let Some(i) = memchr(delim, &self.buf[fresh..self.end]) {
                        let at = fresh + i;
                        return Ok(self.take(at));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.last_error = Some(e.kind());
                    return Err(ReadError::Read { source: e });
                }
            }
        }
    }
}
