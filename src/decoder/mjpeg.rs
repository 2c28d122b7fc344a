//! Pull-based MJPEG decoder

use std::io;

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt};
use image::{DynamicImage, ImageFormat};
use reqwest::header::CONTENT_TYPE;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::error::{Error, Result};
use crate::multipart::{is_valid_boundary, trim_boundary, MultipartReader};

use super::config::DecoderConfig;

/// Byte source for a decoder built from an HTTP response
pub type ResponseBody = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

/// Extract the multipart boundary from a `Content-Type` value
///
/// The media type must be `multipart/*` with a `boundary` parameter. Leading
/// and trailing `-` characters are trimmed from the boundary.
pub fn parse_boundary(content_type: &str) -> Result<String> {
    let media: mime::Mime = content_type
        .parse()
        .map_err(|e| Error::HeaderParseFailed(format!("{}: {:?}", e, content_type)))?;

    if media.type_() != mime::MULTIPART {
        return Err(Error::HeaderParseFailed(format!(
            "not a multipart media type: {}",
            media.essence_str()
        )));
    }

    let boundary = media
        .get_param(mime::BOUNDARY)
        .ok_or_else(|| Error::HeaderParseFailed("missing boundary parameter".into()))?;

    let trimmed = trim_boundary(boundary.as_str());
    if !is_valid_boundary(trimmed) {
        return Err(Error::HeaderParseFailed(format!(
            "invalid boundary parameter: {:?}",
            boundary.as_str()
        )));
    }

    Ok(trimmed.to_string())
}

/// Decodes successive JPEG parts from a multipart stream
///
/// One frame per call, no internal concurrency, no resynchronisation after
/// a malformed part.
///
/// # Example
/// ```no_run
/// use mjpeg_rs::decoder::FrameDecoder;
///
/// # async fn example() -> mjpeg_rs::error::Result<()> {
/// let mut decoder = FrameDecoder::from_url("http://camera.local/video").await?;
/// loop {
///     match decoder.decode().await {
///         Ok(image) => println!("{}x{}", image.width(), image.height()),
///         Err(e) if e.is_end_of_stream() => break,
///         Err(e) => return Err(e),
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FrameDecoder<R> {
    reader: MultipartReader<R>,
    boundary: String,
    frames_read: u64,
}

impl<R: AsyncRead + Unpin> FrameDecoder<R> {
    /// Create a decoder over `source` using `boundary`
    ///
    /// The boundary is trimmed of leading and trailing `-` characters.
    pub fn new(source: R, boundary: &str) -> Self {
        Self::with_config(source, boundary, DecoderConfig::default())
    }

    /// Create a decoder with custom configuration
    pub fn with_config(source: R, boundary: &str, config: DecoderConfig) -> Self {
        let boundary = trim_boundary(boundary).to_string();
        let reader = MultipartReader::with_max_part_size(source, &boundary, config.max_part_size);

        Self {
            reader,
            boundary,
            frames_read: 0,
        }
    }

    /// Create a decoder from a `Content-Type` header value
    pub fn from_content_type(source: R, content_type: &str) -> Result<Self> {
        let boundary = parse_boundary(content_type)?;
        Ok(Self::new(source, &boundary))
    }

    /// The boundary in use (already trimmed)
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Number of parts read so far
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Read the next part's raw body without decoding it
    ///
    /// Useful for relaying a remote stream into a local broadcaster.
    /// Fails with `EndOfStream` when no parts remain.
    pub async fn next_frame(&mut self) -> Result<Bytes> {
        let part = self.reader.next_part().await?.ok_or(Error::EndOfStream)?;
        self.frames_read += 1;

        tracing::trace!(
            frame = self.frames_read,
            size = part.body.len(),
            content_type = part.content_type().unwrap_or(""),
            "Part read"
        );

        Ok(part.body)
    }

    /// Read and decode the next JPEG image
    ///
    /// Fails with `EndOfStream`, `MalformedPart` or `MalformedImage`.
    pub async fn decode(&mut self) -> Result<DynamicImage> {
        let body = self.next_frame().await?;
        let image = image::load_from_memory_with_format(&body, ImageFormat::Jpeg)?;
        Ok(image)
    }
}

impl FrameDecoder<ResponseBody> {
    /// Create a decoder from an HTTP response
    ///
    /// Uses the response's `Content-Type` to find the boundary.
    pub fn from_response(response: reqwest::Response) -> Result<Self> {
        let response = response.error_for_status()?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .ok_or_else(|| Error::HeaderParseFailed("missing Content-Type".into()))?
            .to_str()
            .map_err(|e| Error::HeaderParseFailed(e.to_string()))?;
        let boundary = parse_boundary(content_type)?;

        tracing::debug!(
            url = %response.url(),
            boundary = %boundary,
            "Decoding MJPEG response"
        );

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(io::Error::other))
            .boxed();

        Ok(Self::new(StreamReader::new(body), &boundary))
    }

    /// Issue a GET for `url` and decode the response
    pub async fn from_url(url: &str) -> Result<Self> {
        Self::from_url_with_client(&reqwest::Client::new(), url).await
    }

    /// Issue a GET for `url` with an existing client
    pub async fn from_url_with_client(client: &reqwest::Client, url: &str) -> Result<Self> {
        let response = client.get(url).send().await?;
        Self::from_response(response)
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use image::codecs::jpeg::JpegEncoder;
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::broadcast::FrameBroadcaster;
    use crate::multipart::MultipartWriter;
    use crate::server::{MjpegServer, ServerConfig};

    fn encode_jpeg(image: &RgbImage) -> Vec<u8> {
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 100)
            .encode_image(image)
            .unwrap();
        out
    }

    fn solid(color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(32, 16, Rgb(color))
    }

    async fn multipart_stream(boundary: &str, bodies: &[&[u8]]) -> Vec<u8> {
        let mut writer = MultipartWriter::with_boundary(Vec::new(), boundary);
        for body in bodies {
            let len = body.len().to_string();
            writer
                .write_part(&[("Content-Type", "image/jpeg"), ("Content-Length", &len)], body)
                .await
                .unwrap();
        }
        writer.close().await.unwrap();
        writer.into_inner()
    }

    fn assert_close(actual: &DynamicImage, expected: &RgbImage) {
        let actual = actual.to_rgb8();
        assert_eq!(actual.dimensions(), expected.dimensions());
        for (a, e) in actual.pixels().zip(expected.pixels()) {
            for c in 0..3 {
                let diff = (a[c] as i16 - e[c] as i16).abs();
                assert!(diff <= 8, "pixel {:?} differs from {:?}", a, e);
            }
        }
    }

    #[tokio::test]
    async fn test_decode_round_trip() {
        let original = solid([200, 30, 30]);
        let jpeg = encode_jpeg(&original);
        let stream = multipart_stream("frame", &[&jpeg]).await;

        let mut decoder = FrameDecoder::new(stream.as_slice(), "frame");
        let decoded = decoder.decode().await.unwrap();

        assert_close(&decoded, &original);
    }

    #[tokio::test]
    async fn test_two_frames_then_end_of_stream() {
        let first = solid([240, 240, 240]);
        let second = solid([20, 128, 60]);
        let stream = multipart_stream("X", &[&encode_jpeg(&first), &encode_jpeg(&second)]).await;

        let mut decoder = FrameDecoder::new(stream.as_slice(), "X");

        assert_close(&decoder.decode().await.unwrap(), &first);
        assert_close(&decoder.decode().await.unwrap(), &second);
        assert!(decoder.decode().await.unwrap_err().is_end_of_stream());
        assert_eq!(decoder.frames_read(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_jpeg_is_malformed_image() {
        let stream = multipart_stream("X", &[b"definitely not a jpeg"]).await;

        let mut decoder = FrameDecoder::new(stream.as_slice(), "X");
        let result = decoder.decode().await;

        assert!(matches!(result, Err(Error::MalformedImage(_))));
    }

    #[tokio::test]
    async fn test_truncated_stream_is_malformed_part() {
        let stream = b"--X\r\nContent-Type: image/jpeg\r\n\r\n\xFF\xD8\xFF";

        let mut decoder = FrameDecoder::new(&stream[..], "X");
        let result = decoder.decode().await;

        assert!(matches!(result, Err(Error::MalformedPart(_))));
    }

    #[tokio::test]
    async fn test_next_frame_returns_raw_bytes() {
        let stream = multipart_stream("X", &[b"raw-1", b"raw-2"]).await;

        let mut decoder = FrameDecoder::new(stream.as_slice(), "--X");
        assert_eq!(decoder.boundary(), "X");
        assert_eq!(decoder.next_frame().await.unwrap().as_ref(), b"raw-1");
        assert_eq!(decoder.next_frame().await.unwrap().as_ref(), b"raw-2");
        assert!(matches!(decoder.next_frame().await, Err(Error::EndOfStream)));
    }

    #[tokio::test]
    async fn test_from_content_type() {
        let stream = multipart_stream("myboundary", &[b"abc"]).await;

        let mut decoder = FrameDecoder::from_content_type(
            stream.as_slice(),
            "multipart/x-mixed-replace; boundary=--myboundary",
        )
        .unwrap();

        assert_eq!(decoder.boundary(), "myboundary");
        assert_eq!(decoder.next_frame().await.unwrap().as_ref(), b"abc");
    }

    #[test]
    fn test_parse_boundary() {
        assert_eq!(
            parse_boundary("multipart/x-mixed-replace;boundary=boundarydonotcross").unwrap(),
            "boundarydonotcross"
        );
        assert_eq!(
            parse_boundary("multipart/x-mixed-replace; boundary=--abc--").unwrap(),
            "abc"
        );
    }

    #[test]
    fn test_parse_boundary_rejects_overlong() {
        let content_type = format!("multipart/x-mixed-replace; boundary={}", "b".repeat(71));
        assert!(matches!(
            parse_boundary(&content_type),
            Err(Error::HeaderParseFailed(_))
        ));
    }

    fn http_client() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    async fn serve_router(router: axum::Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        addr
    }

    #[tokio::test]
    async fn test_from_url_decodes_served_stream() {
        let broadcaster = Arc::new(FrameBroadcaster::new());
        let server = MjpegServer::new(
            ServerConfig::with_addr("127.0.0.1:0".parse().unwrap()),
            Arc::clone(&broadcaster),
        );
        let listener = server.bind().await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { server.serve(listener).await });

        let mut decoder = FrameDecoder::from_url(&format!("http://{addr}/"))
            .await
            .unwrap();
        assert_eq!(broadcaster.active_subscriber_count(), 1);

        broadcaster.publish(Bytes::from_static(b"hello")).unwrap();
        assert_eq!(decoder.next_frame().await.unwrap().as_ref(), b"hello");

        let original = solid([30, 30, 200]);
        broadcaster.publish(encode_jpeg(&original)).unwrap();
        assert_close(&decoder.decode().await.unwrap(), &original);

        broadcaster.shutdown().unwrap();
        assert!(decoder.decode().await.unwrap_err().is_end_of_stream());
    }

    #[tokio::test]
    async fn test_from_url_rejects_error_status() {
        let router = Router::new().route(
            "/",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "camera offline") }),
        );
        let addr = serve_router(router).await;

        let result =
            FrameDecoder::from_url_with_client(&http_client(), &format!("http://{addr}/")).await;
        assert!(matches!(result, Err(Error::Http(_))));
    }

    #[tokio::test]
    async fn test_from_url_rejects_non_multipart() {
        let router = Router::new().route("/", get(|| async { "just some text" }));
        let addr = serve_router(router).await;

        let result =
            FrameDecoder::from_url_with_client(&http_client(), &format!("http://{addr}/")).await;
        assert!(matches!(result, Err(Error::HeaderParseFailed(_))));
    }

    #[test]
    fn test_parse_boundary_errors() {
        assert!(matches!(
            parse_boundary("image/jpeg"),
            Err(Error::HeaderParseFailed(_))
        ));
        assert!(matches!(
            parse_boundary("multipart/x-mixed-replace"),
            Err(Error::HeaderParseFailed(_))
        ));
        assert!(matches!(
            parse_boundary("multipart/x-mixed-replace; boundary=----"),
            Err(Error::HeaderParseFailed(_))
        ));
        assert!(matches!(
            parse_boundary("not a media type"),
            Err(Error::HeaderParseFailed(_))
        ));
    }
}
