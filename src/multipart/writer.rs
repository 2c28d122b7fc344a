//! Multipart stream writer
//!
//! Wire layout produced for a stream with boundary `B`:
//! ```text
//! --B\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 1234\r\n
//! \r\n
//! <1234 bytes>\r\n
//! --B\r\n
//! ...
//! \r\n
//! --B--\r\n
//! ```

use std::io;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::boundary::random_boundary;

/// Writes MIME multipart parts to an async sink
#[derive(Debug)]
pub struct MultipartWriter<W> {
    inner: W,
    boundary: String,
    parts_written: u64,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> MultipartWriter<W> {
    /// Create a writer with a fresh random boundary
    pub fn new(inner: W) -> Self {
        Self::with_boundary(inner, random_boundary())
    }

    /// Create a writer with a caller-chosen boundary
    pub fn with_boundary(inner: W, boundary: impl Into<String>) -> Self {
        Self {
            inner,
            boundary: boundary.into(),
            parts_written: 0,
            closed: false,
        }
    }

    /// The boundary token (without leading dashes)
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `Content-Type` value for a replacing-image stream using this boundary
    pub fn content_type(&self) -> String {
        format!("multipart/x-mixed-replace; boundary={}", self.boundary)
    }

    /// Number of parts written so far
    pub fn parts_written(&self) -> u64 {
        self.parts_written
    }

    /// Write one part: delimiter, headers, blank line, body
    ///
    /// Header names are written exactly as given. Returns the number of bytes
    /// written. Does not flush.
    pub async fn write_part(&mut self, headers: &[(&str, &str)], body: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "multipart writer is closed",
            ));
        }

        let mut head = BytesMut::with_capacity(128 + self.boundary.len());
        if self.parts_written > 0 {
            head.put_slice(b"\r\n");
        }
        head.put_slice(b"--");
        head.put_slice(self.boundary.as_bytes());
        head.put_slice(b"\r\n");
        for (name, value) in headers {
            head.put_slice(name.as_bytes());
            head.put_slice(b": ");
            head.put_slice(value.as_bytes());
            head.put_slice(b"\r\n");
        }
        head.put_slice(b"\r\n");

        self.inner.write_all(&head).await?;
        self.inner.write_all(body).await?;
        self.parts_written += 1;

        Ok(head.len() + body.len())
    }

    /// Flush buffered bytes to the underlying sink
    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    /// Write the terminal boundary marker and flush
    ///
    /// Calling `close` more than once writes the marker only once.
    pub async fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut tail = BytesMut::with_capacity(8 + self.boundary.len());
        if self.parts_written > 0 {
            tail.put_slice(b"\r\n");
        }
        tail.put_slice(b"--");
        tail.put_slice(self.boundary.as_bytes());
        tail.put_slice(b"--\r\n");

        self.inner.write_all(&tail).await?;
        self.inner.flush().await
    }

    /// Get a reference to the underlying sink
    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// Get a mutable reference to the underlying sink
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Consume the writer, returning the underlying sink
    pub fn into_inner(self) -> W {
        self.inner
    }
}
