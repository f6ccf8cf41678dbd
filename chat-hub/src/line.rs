use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Newline-framed reader that keeps partial input across cancellations.
///
/// Bytes read so far live in the reader rather than in the caller's future,
/// so dropping a pending [`LineReader::next_line`] inside `select!` or
/// `timeout` loses nothing; the next call picks the line up where it stopped.
pub struct LineReader<R> {
    inner: BufReader<R>,
    pending: Vec<u8>,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            pending: Vec::new(),
        }
    }

    /// Reads the next non-blank line, stripped of its line ending.
    ///
    /// Bytes that are not valid UTF-8 are replaced with `U+FFFD` rather than
    /// failing the stream. Returns `Ok(None)` once the peer closes its half.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            let read = self.inner.read_until(b'\n', &mut self.pending).await?;
            if read == 0 && self.pending.is_empty() {
                return Ok(None);
            }

            let line = String::from_utf8_lossy(&self.pending)
                .trim_end_matches(LINE_ENDINGS)
                .to_string();
            self.pending.clear();
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // One write per line so a partial failure never interleaves two messages.
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
