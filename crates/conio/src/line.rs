use std::time::Duration;

use bytes::Bytes;
use bytes::BytesMut;
use memchr::memchr;
use memchr::memmem;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::telnet::IacFilter;

/// Buffered line reader over the raw console transport.
///
/// The transport delivers arbitrary byte chunks, not pre-split lines.
/// Chunks are run through the telnet [`IacFilter`] first, then buffered
/// until an embedded `\n` appears; any remainder carries to the next
/// call. Decoding is lossy: invalid UTF-8 is replaced, never fatal.
#[derive(Debug)]
pub struct ConsoleReader<R> {
    inner: R,
    filter: IacFilter,
    buf: BytesMut,
    scratch: BytesMut,
    max_line_len: usize,
    eof: bool,
}

impl<R> ConsoleReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            filter: IacFilter::new(),
            buf: BytesMut::with_capacity(8 * 1024),
            scratch: BytesMut::with_capacity(4 * 1024),
            max_line_len: 16 * 1024,
            eof: false,
        }
    }

    pub fn max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = max.max(1);
        self
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: AsyncRead + Unpin> ConsoleReader<R> {
    /// Read one complete line, stripping the trailing `\n` and optional `\r`.
    ///
    /// Returns:
    /// - `Ok(Some(line))` for a line (may be empty),
    /// - `Ok(None)` on EOF with no buffered data.
    ///
    /// Unlike a strict framing reader, a connection that closes mid-line
    /// yields the unterminated fragment as a final line: the console ends
    /// prompts and some shutdown notices without a terminator.
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(i) = memchr(b'\n', &self.buf) {
                let raw = self.buf.split_to(i + 1);
                return Ok(Some(decode_line(&raw)));
            }

            if self.eof {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                let raw = self.buf.split();
                return Ok(Some(decode_line(&raw)));
            }

            if self.buf.len() > self.max_line_len {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "console line too long",
                ));
            }

            self.fill().await?;
        }
    }

    /// Read until `needle` appears in the stream, consuming through it.
    ///
    /// Used for the non-line-terminated authentication prompt. Returns
    /// `Ok(None)` if the stream ends first. The search window is bounded:
    /// older bytes are discarded once the buffer outgrows the line cap.
    pub async fn read_until(&mut self, needle: &[u8]) -> std::io::Result<Option<Bytes>> {
        loop {
            if let Some(i) = memmem::find(&self.buf, needle) {
                let raw = self.buf.split_to(i + needle.len());
                return Ok(Some(raw.freeze()));
            }

            if self.eof {
                return Ok(None);
            }

            if self.buf.len() > self.max_line_len {
                // Keep just enough tail to match a needle spanning the cut.
                let keep = needle.len().saturating_sub(1);
                let drop = self.buf.len() - keep;
                let _ = self.buf.split_to(drop);
            }

            self.fill().await?;
        }
    }

    /// Discard everything already buffered plus anything that arrives
    /// until the stream stays quiet for `quiet`.
    ///
    /// The console echoes command output inline in the same stream the
    /// event recognizers read; callers discard that echo after every
    /// write so the next read starts clean. Discarded bytes still pass
    /// through the IAC filter so its state stays aligned.
    pub async fn discard_until_quiet(&mut self, quiet: Duration) -> std::io::Result<()> {
        self.buf.clear();
        loop {
            match tokio::time::timeout(quiet, self.fill()).await {
                Err(_) => return Ok(()),
                Ok(Ok(())) => {
                    if self.eof {
                        return Ok(());
                    }
                    self.buf.clear();
                }
                Ok(Err(e)) => return Err(e),
            }
        }
    }

    async fn fill(&mut self) -> std::io::Result<()> {
        self.scratch.clear();
        let n = self.inner.read_buf(&mut self.scratch).await?;
        if n == 0 {
            self.eof = true;
            return Ok(());
        }
        let mut stripped = Vec::with_capacity(n);
        self.filter.strip_into(&self.scratch[..], &mut stripped);
        self.buf.extend_from_slice(&stripped);
        Ok(())
    }
}

fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Newline-terminated command writer for the console's outbound side.
#[derive(Debug)]
pub struct ConsoleWriter<W> {
    inner: W,
}

impl<W> ConsoleWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin> ConsoleWriter<W> {
    pub async fn write_line(&mut self, text: &str) -> std::io::Result<()> {
        self.inner.write_all(text.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await
    }
}
