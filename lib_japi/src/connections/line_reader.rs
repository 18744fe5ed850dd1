//! # Line Reader
//!
//! Extracts `\n`-terminated logical lines from a byte stream. Each client
//! connection owns one `LineReader`; bytes that arrive after a newline are
//! carried over to the next call, so a single read burst containing several
//! concatenated lines yields exactly one line per call until the carry
//! buffer is drained.
//!
//! ## Contract
//!
//! - `Ok(Some(line))` for a complete line with the terminator stripped.
//!   `\r\n` is accepted as a terminator and stripped as a whole.
//! - `Ok(Some(""))` for an empty line.
//! - `Ok(None)` for EOF with nothing buffered.
//! - `Err(EofMidLine)` when the peer disconnects mid-line.
//! - `Err(LineTooLarge)` when a line exceeds the configured cap.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::JapiError;

/// Size of a single read request against the underlying stream.
const READ_BLOCK_SIZE: usize = 1024;

/// Default cap on the length of a single line.
pub const DEFAULT_MAX_LINE_SIZE: usize = 64 * 1024 * 1024;

/// Stateful reader that assembles newline-delimited lines from a stream.
///
/// The accumulation buffer grows geometrically (via `BytesMut`) up to the
/// configured maximum line size. State must never be shared between
/// clients; construct one reader per connection.
pub struct LineReader {
    /// Accumulated bytes, including any carry-over from the previous call.
    buf: BytesMut,
    /// Number of leading bytes already scanned for a newline.
    scanned: usize,
    /// Longest accepted line, terminator excluded.
    max_line_size: usize,
}

impl LineReader {
    /// Creates a reader with the default 64 MiB line cap.
    pub fn new() -> Self {
        Self::with_max_line_size(DEFAULT_MAX_LINE_SIZE)
    }

    /// Creates a reader with a custom line cap.
    pub fn with_max_line_size(max_line_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(READ_BLOCK_SIZE),
            scanned: 0,
            max_line_size,
        }
    }

    /// Reads the next complete line from `src`.
    ///
    /// Interrupted reads are retried transparently; any other I/O error is
    /// returned as is.
    pub async fn next_line<R>(&mut self, src: &mut R) -> Result<Option<String>, JapiError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            // Scan only the bytes that have not been looked at yet.
            if let Some(pos) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
                let nl_pos = self.scanned + pos;
                let mut line = self.buf.split_to(nl_pos + 1);
                self.scanned = 0;

                // Strip '\n', then a '\r' directly in front of it.
                line.truncate(nl_pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }

                if line.len() > self.max_line_size {
                    return Err(JapiError::LineTooLarge(self.max_line_size));
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
            self.scanned = self.buf.len();

            // Everything buffered belongs to one unterminated line. Allow one
            // byte of slack for a trailing '\r' that may precede the '\n'.
            if self.buf.len() > self.max_line_size + 1 {
                return Err(JapiError::LineTooLarge(self.max_line_size));
            }

            self.buf.reserve(READ_BLOCK_SIZE);
            let nread = match src.read_buf(&mut self.buf).await {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if nread == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(JapiError::EofMidLine);
            }
        }
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_multiple_lines_from_one_buffer() {
        let mut src: &[u8] = b"first\nsecond\nthird\n";
        let mut reader = LineReader::new();

        assert_eq!(reader.next_line(&mut src).await.unwrap().unwrap(), "first");
        assert_eq!(reader.next_line(&mut src).await.unwrap().unwrap(), "second");
        assert_eq!(reader.next_line(&mut src).await.unwrap().unwrap(), "third");
        assert!(reader.next_line(&mut src).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_crlf_is_stripped_like_lf() {
        let mut src: &[u8] = b"with-cr\r\nwithout-cr\n";
        let mut reader = LineReader::new();

        assert_eq!(reader.next_line(&mut src).await.unwrap().unwrap(), "with-cr");
        assert_eq!(
            reader.next_line(&mut src).await.unwrap().unwrap(),
            "without-cr"
        );
    }

    #[tokio::test]
    async fn test_empty_line_is_not_eof() {
        let mut src: &[u8] = b"\nrest\n";
        let mut reader = LineReader::new();

        assert_eq!(reader.next_line(&mut src).await.unwrap().unwrap(), "");
        assert_eq!(reader.next_line(&mut src).await.unwrap().unwrap(), "rest");
        assert!(reader.next_line(&mut src).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_with_partial_line_fails() {
        let mut src: &[u8] = b"no terminator";
        let mut reader = LineReader::new();

        assert!(matches!(
            reader.next_line(&mut src).await,
            Err(JapiError::EofMidLine)
        ));
    }

    #[tokio::test]
    async fn test_line_cap_boundary() {
        // A line of exactly the cap is accepted.
        let mut src: &[u8] = b"12345678\n";
        let mut reader = LineReader::with_max_line_size(8);
        assert_eq!(reader.next_line(&mut src).await.unwrap().unwrap(), "12345678");

        // One byte more is rejected.
        let mut src: &[u8] = b"123456789\n";
        let mut reader = LineReader::with_max_line_size(8);
        assert!(matches!(
            reader.next_line(&mut src).await,
            Err(JapiError::LineTooLarge(8))
        ));

        // The cap also applies while the line is still unterminated.
        let mut src: &[u8] = &[b'x'; 32][..];
        let mut reader = LineReader::with_max_line_size(8);
        assert!(matches!(
            reader.next_line(&mut src).await,
            Err(JapiError::LineTooLarge(8))
        ));
    }

    #[tokio::test]
    async fn test_line_split_across_reads() {
        let (mut tx, mut rx) = tokio::io::duplex(64);
        let writer = tokio::spawn(async move {
            tx.write_all(b"{\"japi_re").await.unwrap();
            tx.flush().await.unwrap();
            tokio::task::yield_now().await;
            tx.write_all(b"quest\":\"ping\"}\n").await.unwrap();
        });

        let mut reader = LineReader::new();
        let line = reader.next_line(&mut rx).await.unwrap().unwrap();
        assert_eq!(line, "{\"japi_request\":\"ping\"}");
        writer.await.unwrap();
    }
}
