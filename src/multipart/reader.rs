//! Multipart stream reader
//!
//! Pulls parts off an async byte source one at a time. Anything before the
//! first `--B` line is preamble and ignored; a `--B--` line ends the stream.
//! Both CRLF and bare LF line endings are accepted since many cameras emit
//! the latter.
//!
//! A part that declares `Content-Length` is returned as soon as its body has
//! arrived; otherwise the body runs to the next delimiter, which on a live
//! stream means waiting for the following part to start.

use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::HeaderMap;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Bytes requested from the source per read
const READ_CHUNK: usize = 8 * 1024;

/// Maximum size of one part's header block
pub const MAX_HEADER_SIZE: usize = 16 * 1024;

/// Default maximum size of one part body
pub const DEFAULT_MAX_PART_SIZE: usize = 16 * 1024 * 1024;

/// One part of a multipart stream
#[derive(Debug, Clone)]
pub struct Part {
    /// Part headers
    pub headers: HeaderMap,
    /// Part body
    pub body: Bytes,
}

impl Part {
    /// The part's `Content-Type`, if present and valid UTF-8
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)?.to_str().ok()
    }

    /// The part's declared `Content-Length`, if present and numeric
    pub fn content_length(&self) -> Option<usize> {
        declared_length(&self.headers)
    }
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.trim().parse().ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    /// Looking for the first boundary line
    Preamble,
    /// Just consumed `--B`, rest of the line decides what follows
    Boundary,
    /// Body read by length, the delimiter is still unread
    AfterBody,
    /// Terminal boundary seen or source exhausted
    Done,
}

/// Reads MIME multipart parts from an async source
///
/// Not cancel-safe: dropping a pending `next_part` future loses the
/// partially read part.
#[derive(Debug)]
pub struct MultipartReader<R> {
    inner: R,
    buf: BytesMut,
    /// `--B`
    dash_boundary: Bytes,
    /// `\n--B`
    delimiter: Bytes,
    state: ReaderState,
    max_part_size: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> MultipartReader<R> {
    /// Create a reader for the given boundary (without leading dashes)
    pub fn new(inner: R, boundary: &str) -> Self {
        Self::with_max_part_size(inner, boundary, DEFAULT_MAX_PART_SIZE)
    }

    /// Create a reader that rejects parts larger than `max_part_size`
    pub fn with_max_part_size(inner: R, boundary: &str, max_part_size: usize) -> Self {
        let dash_boundary = Bytes::from(format!("--{}", boundary));
        let delimiter = Bytes::from(format!("\n--{}", boundary));

        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK),
            dash_boundary,
            delimiter,
            state: ReaderState::Preamble,
            max_part_size,
            eof: false,
        }
    }

    /// Read the next part
    ///
    /// Returns `Ok(None)` once the stream is exhausted, either through the
    /// terminal boundary or a clean EOF between parts.
    pub async fn next_part(&mut self) -> Result<Option<Part>> {
        if self.state == ReaderState::Preamble && !self.skip_preamble().await? {
            self.state = ReaderState::Done;
        }
        if self.state == ReaderState::AfterBody && !self.expect_delimiter().await? {
            self.state = ReaderState::Done;
        }
        if self.state == ReaderState::Done {
            return Ok(None);
        }

        if !self.finish_boundary_line().await? {
            self.state = ReaderState::Done;
            return Ok(None);
        }

        let headers = match self.read_headers().await? {
            Some(headers) => headers,
            None => {
                self.state = ReaderState::Done;
                return Ok(None);
            }
        };
        let body = match declared_length(&headers) {
            Some(len) => self.read_sized_body(len).await?,
            None => self.read_body().await?,
        };

        Ok(Some(Part { headers, body }))
    }

    /// Pull more bytes from the source. Returns the count read (0 at EOF).
    async fn fill(&mut self) -> Result<usize> {
        if self.eof {
            return Ok(0);
        }
        self.buf.reserve(READ_CHUNK);
        let n = self.inner.read_buf(&mut self.buf).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    /// Consume everything up to and including the first `--B` at a line
    /// start. Returns false if the source ends first.
    async fn skip_preamble(&mut self) -> Result<bool> {
        loop {
            if let Some(pos) = find_line_start(&self.buf, &self.dash_boundary) {
                self.buf.advance(pos + self.dash_boundary.len());
                self.state = ReaderState::Boundary;
                return Ok(true);
            }

            // Keep just enough to match a boundary split across reads
            let keep = self.delimiter.len();
            if self.buf.len() > keep {
                let discard = self.buf.len() - keep;
                self.buf.advance(discard);
            }

            if self.fill().await? == 0 {
                return Ok(false);
            }
        }
    }

    /// Consume the remainder of a boundary line. Returns false when the line
    /// is the terminal `--B--` or the source ended right after `--B`.
    async fn finish_boundary_line(&mut self) -> Result<bool> {
        let line = match self.take_line().await? {
            Some(line) => line,
            None if self.buf.is_empty() => return Ok(false),
            None => {
                if self.buf.starts_with(b"--") {
                    return Ok(false);
                }
                return Err(Error::MalformedPart(
                    "unexpected end of stream after boundary".into(),
                ));
            }
        };

        if line.starts_with(b"--") {
            return Ok(false);
        }
        if line.iter().any(|b| !matches!(b, b' ' | b'\t')) {
            return Err(Error::MalformedPart(
                "unexpected data after boundary".into(),
            ));
        }

        Ok(true)
    }

    /// Read header lines up to the blank separator line. `None` means the
    /// source ended cleanly before any header bytes.
    async fn read_headers(&mut self) -> Result<Option<HeaderMap>> {
        let mut headers = HeaderMap::new();
        let mut consumed = 0;

        loop {
            let line = match self.take_line().await? {
                Some(line) => line,
                None if consumed == 0 && self.buf.is_empty() => return Ok(None),
                None => {
                    return Err(Error::MalformedPart(
                        "unexpected end of stream in part headers".into(),
                    ))
                }
            };

            consumed += line.len() + 1;
            if consumed > MAX_HEADER_SIZE {
                return Err(Error::MalformedPart("part headers too large".into()));
            }
            if line.is_empty() {
                return Ok(Some(headers));
            }

            let (name, value) = parse_header_line(&line)?;
            headers.append(name, value);
        }
    }

    /// Read a body up to the next delimiter, leaving the reader positioned
    /// just after `--B`.
    async fn read_body(&mut self) -> Result<Bytes> {
        let mut search_from = 0;

        loop {
            if let Some(pos) = find(&self.buf[search_from..], &self.delimiter) {
                let pos = search_from + pos;
                let after = pos + self.delimiter.len();

                match self.buf.get(after) {
                    // Real delimiter: followed by line end, whitespace or `--`
                    Some(b'\r' | b'\n' | b' ' | b'\t' | b'-') => {}
                    Some(_) => {
                        search_from = pos + 1;
                        continue;
                    }
                    // Need one more byte to decide, unless the source is done
                    None if !self.eof => {
                        search_from = pos;
                        self.fill().await?;
                        continue;
                    }
                    None => {}
                }

                let mut body = self.buf.split_to(pos).freeze();
                if body.ends_with(b"\r") {
                    body.truncate(body.len() - 1);
                }
                self.buf.advance(self.delimiter.len());
                self.state = ReaderState::Boundary;
                return Ok(body);
            }

            if self.buf.len() > self.max_part_size {
                return Err(Error::MalformedPart(format!(
                    "part exceeds {} bytes",
                    self.max_part_size
                )));
            }

            search_from = self.buf.len().saturating_sub(self.delimiter.len());
            if self.fill().await? == 0 {
                return Err(Error::MalformedPart(
                    "unexpected end of stream in part body".into(),
                ));
            }
        }
    }

    /// Read exactly `len` body bytes. The delimiter that must follow is
    /// checked on the next call.
    async fn read_sized_body(&mut self, len: usize) -> Result<Bytes> {
        if len > self.max_part_size {
            return Err(Error::MalformedPart(format!(
                "part exceeds {} bytes",
                self.max_part_size
            )));
        }

        while self.buf.len() < len {
            if self.fill().await? == 0 {
                return Err(Error::MalformedPart(
                    "unexpected end of stream in part body".into(),
                ));
            }
        }

        let body = self.buf.split_to(len).freeze();
        self.state = ReaderState::AfterBody;
        Ok(body)
    }

    /// Consume the delimiter after a sized body. Returns false on a clean
    /// EOF instead of a delimiter.
    async fn expect_delimiter(&mut self) -> Result<bool> {
        // Optional `\r`, then `\n--B`
        let needed = self.delimiter.len() + 1;
        while self.buf.len() < needed {
            if self.fill().await? == 0 {
                break;
            }
        }
        if self.buf.is_empty() {
            return Ok(false);
        }

        let skip = usize::from(self.buf.starts_with(b"\r"));
        if !self.buf[skip..].starts_with(&self.delimiter) {
            return Err(Error::MalformedPart(
                "part body does not match its Content-Length".into(),
            ));
        }

        self.buf.advance(skip + self.delimiter.len());
        self.state = ReaderState::Boundary;
        Ok(true)
    }

    /// Take one line (without its `\n` or trailing `\r`), reading more as
    /// needed. `None` at EOF without a complete line.
    async fn take_line(&mut self) -> Result<Option<Bytes>> {
        let mut search_from = 0;

        loop {
            if let Some(pos) = self.buf[search_from..].iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(search_from + pos + 1).freeze();
                line.truncate(line.len() - 1);
                if line.ends_with(b"\r") {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(line));
            }

            if self.buf.len() > MAX_HEADER_SIZE {
                return Err(Error::MalformedPart("line too long".into()));
            }

            search_from = self.buf.len();
            if self.fill().await? == 0 {
                return Ok(None);
            }
        }
    }
}

/// Parse a `Name: value` header line
fn parse_header_line(line: &[u8]) -> Result<(HeaderName, HeaderValue)> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| Error::MalformedPart("header line without ':'".into()))?;

    let name = HeaderName::from_bytes(line[..colon].trim_ascii())
        .map_err(|e| Error::MalformedPart(format!("invalid header name: {}", e)))?;
    let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii())
        .map_err(|e| Error::MalformedPart(format!("invalid header value: {}", e)))?;

    Ok((name, value))
}

/// Position of the first occurrence of `needle` in `haystack`
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Position of `needle` at the start of the buffer or right after a `\n`
fn find_line_start(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = find(&haystack[from..], needle) {
        let pos = from + pos;
        if pos == 0 || haystack[pos - 1] == b'\n' {
            return Some(pos);
        }
        from = pos + 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    async fn read_all(input: &[u8], boundary: &str) -> Result<Vec<Part>> {
        let mut reader = MultipartReader::new(input, boundary);
        let mut parts = Vec::new();
        while let Some(part) = reader.next_part().await? {
            parts.push(part);
        }
        Ok(parts)
    }

    #[tokio::test]
    async fn test_two_parts_with_terminator() {
        let input = b"--X\r\nContent-Type: image/jpeg\r\n\r\none\r\n\
                      --X\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\ntwo\r\n\
                      --X--\r\n";

        let parts = read_all(input, "X").await.unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].body.as_ref(), b"one");
        assert_eq!(parts[0].content_type(), Some("image/jpeg"));
        assert_eq!(parts[0].content_length(), None);
        assert_eq!(parts[1].body.as_ref(), b"two");
        assert_eq!(parts[1].content_length(), Some(3));
    }

    #[tokio::test]
    async fn test_preamble_is_skipped() {
        let input = b"this is a preamble\r\n--X\r\nA: b\r\n\r\nbody\r\n--X--";

        let parts = read_all(input, "X").await.unwrap();

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].body.as_ref(), b"body");
        assert_eq!(parts[0].headers.get("a").unwrap(), "b");
    }

    #[tokio::test]
    async fn test_bare_lf_line_endings() {
        let input = b"--B\nContent-Type: image/jpeg\n\nabc\n--B\n\nxyz\n--B--\n";

        let parts = read_all(input, "B").await.unwrap();

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].body.as_ref(), b"abc");
        assert_eq!(parts[1].body.as_ref(), b"xyz");
        assert!(parts[1].headers.is_empty());
    }

    #[tokio::test]
    async fn test_body_containing_boundary_prefix() {
        // `\n--XY` is not a delimiter for boundary `X`
        let input = b"--X\r\n\r\nline\n--XY more\r\n--X--\r\n";

        let parts = read_all(input, "X").await.unwrap();

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].body.as_ref(), b"line\n--XY more");
    }

    #[tokio::test]
    async fn test_binary_body_with_crlf() {
        let body: Vec<u8> = vec![0xFF, 0xD8, b'\r', b'\n', 0x00, b'\r', b'\n', 0xFF, 0xD9];
        let mut input = b"--X\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        input.extend_from_slice(&body);
        input.extend_from_slice(b"\r\n--X--\r\n");

        let parts = read_all(&input, "X").await.unwrap();

        assert_eq!(parts[0].body.as_ref(), body.as_slice());
    }

    #[tokio::test]
    async fn test_sized_part_returned_before_next_boundary() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut reader = MultipartReader::new(client, "X");

        server
            .write_all(b"--X\r\nContent-Length: 5\r\n\r\nhello")
            .await
            .unwrap();

        // Nothing after the body yet, but the declared length is satisfied
        let part = reader.next_part().await.unwrap().unwrap();
        assert_eq!(part.body.as_ref(), b"hello");

        server.write_all(b"\r\n--X--\r\n").await.unwrap();
        assert!(reader.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_content_length_is_malformed() {
        let input = b"--X\r\nContent-Length: 2\r\n\r\nhello\r\n--X--\r\n";

        let mut reader = MultipartReader::new(&input[..], "X");
        let part = reader.next_part().await.unwrap().unwrap();
        assert_eq!(part.body.as_ref(), b"he");

        let result = reader.next_part().await;
        assert!(matches!(result, Err(Error::MalformedPart(_))));
    }

    #[tokio::test]
    async fn test_empty_source_is_end_of_stream() {
        let parts = read_all(b"", "X").await.unwrap();
        assert!(parts.is_empty());
    }

    #[tokio::test]
    async fn test_eof_between_parts_ends_stream() {
        let parts = read_all(b"--X\r\n\r\nabc\r\n--X\r\n", "X").await.unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[tokio::test]
    async fn test_truncated_body_is_malformed() {
        let result = read_all(b"--X\r\nContent-Type: image/jpeg\r\n\r\nabc", "X").await;
        assert!(matches!(result, Err(Error::MalformedPart(_))));
    }

    #[tokio::test]
    async fn test_truncated_headers_is_malformed() {
        let result = read_all(b"--X\r\nContent-Type: ima", "X").await;
        assert!(matches!(result, Err(Error::MalformedPart(_))));
    }

    #[tokio::test]
    async fn test_invalid_header_line_is_malformed() {
        let result = read_all(b"--X\r\nno colon here\r\n\r\nabc\r\n--X--", "X").await;
        assert!(matches!(result, Err(Error::MalformedPart(_))));
    }

    #[tokio::test]
    async fn test_garbage_after_boundary_is_malformed() {
        let result = read_all(b"--X junk\r\n\r\nabc\r\n--X--", "X").await;
        assert!(matches!(result, Err(Error::MalformedPart(_))));
    }

    #[tokio::test]
    async fn test_part_size_limit() {
        let mut input = b"--X\r\n\r\n".to_vec();
        input.extend(std::iter::repeat(b'a').take(64 * 1024));
        input.extend_from_slice(b"\r\n--X--\r\n");

        let mut reader = MultipartReader::with_max_part_size(input.as_slice(), "X", 1024);
        let result = reader.next_part().await;

        assert!(matches!(result, Err(Error::MalformedPart(_))));
    }

    #[tokio::test]
    async fn test_boundary_split_across_reads() {
        let (client, mut server) = tokio::io::duplex(4);
        let input = b"--X\r\nContent-Type: image/jpeg\r\n\r\nsplit body\r\n--X--\r\n";

        let writer = tokio::spawn(async move {
            for chunk in input.chunks(3) {
                server.write_all(chunk).await.unwrap();
            }
        });

        let mut reader = MultipartReader::new(client, "X");
        let part = reader.next_part().await.unwrap().unwrap();
        assert_eq!(part.body.as_ref(), b"split body");
        assert!(reader.next_part().await.unwrap().is_none());

        writer.await.unwrap();
    }

    #[test]
    fn test_find_line_start() {
        assert_eq!(find_line_start(b"--X", b"--X"), Some(0));
        assert_eq!(find_line_start(b"a--X\n--X", b"--X"), Some(5));
        assert_eq!(find_line_start(b"a--X", b"--X"), None);
    }
}
