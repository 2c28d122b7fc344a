//! Error types

use std::io;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation attempted after the broadcaster was shut down
    #[error("stream was closed")]
    StreamClosed,

    /// No more parts in a multipart stream
    #[error("end of stream")]
    EndOfStream,

    /// Multipart framing is invalid
    #[error("malformed multipart part: {0}")]
    MalformedPart(String),

    /// Part body is not a decodable JPEG
    #[error("malformed image: {0}")]
    MalformedImage(#[from] image::ImageError),

    /// Writing to a client connection failed
    #[error("connection write failed: {0}")]
    ConnectionWriteFailed(#[source] io::Error),

    /// Content-Type header could not be parsed or lacks a boundary
    #[error("failed to parse header: {0}")]
    HeaderParseFailed(String),

    /// Transport-level I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Outbound HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Whether this error marks a clean end of a multipart stream
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }
}
