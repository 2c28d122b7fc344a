//! Per-connection MJPEG stream handler
//!
//! Drives one client through `Registering -> Streaming -> Closing`:
//! subscribe, then write one multipart part per received frame, flushing
//! after each so the client sees it immediately. The HTTP response head is
//! sent by the route that owns the handler; see [`content_type`].
//!
//! [`content_type`]: StreamHandler::content_type

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWrite;

use crate::broadcast::{Frame, FrameBroadcaster, Subscription};
use crate::error::{Error, Result};
use crate::multipart::MultipartWriter;
use crate::stats::SessionStats;

use super::config::ServerConfig;

/// Handler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    /// Subscribed, response not yet streaming
    Registering,
    /// Forwarding frames to the client
    Streaming,
    /// Unsubscribed, terminating the multipart body
    Closing,
}

/// Why the streaming loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// Broadcaster shut down or the subscription was removed
    StreamClosed,
    /// Client went away while we were waiting
    Disconnected,
    /// A write to the client failed or missed its deadline
    WriteFailed,
}

/// Streams frames from a broadcaster to one client connection
pub struct StreamHandler<W> {
    session_id: u64,
    writer: MultipartWriter<W>,
    broadcaster: Arc<FrameBroadcaster>,
    subscription: Subscription,
    frame_interval: Duration,
    write_timeout: Option<Duration>,
    state: HandlerState,
    stats: SessionStats,
}

impl<W: AsyncWrite + Unpin> StreamHandler<W> {
    /// Subscribe to `broadcaster` and prepare to write parts to `writer`
    ///
    /// Each handler gets a fresh random boundary.
    pub fn new(
        session_id: u64,
        writer: W,
        broadcaster: Arc<FrameBroadcaster>,
        config: &ServerConfig,
    ) -> Self {
        let subscription = broadcaster.subscribe();

        Self {
            session_id,
            writer: MultipartWriter::new(writer),
            broadcaster,
            subscription,
            frame_interval: config.frame_interval,
            write_timeout: config.write_timeout,
            state: HandlerState::Registering,
            stats: SessionStats::new(),
        }
    }

    /// The multipart boundary used for this connection
    pub fn boundary(&self) -> &str {
        self.writer.boundary()
    }

    /// `Content-Type` of the response this handler produces
    pub fn content_type(&self) -> String {
        self.writer.content_type()
    }

    /// Current lifecycle state
    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// Run until the stream closes, the client disconnects, or a write fails
    ///
    /// `disconnected` resolves when the peer goes away; it lets a handler
    /// blocked waiting for a frame notice a dead client. Write failures are
    /// handled here and never reach the caller.
    pub async fn run<F>(mut self, disconnected: F) -> SessionStats
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        tokio::pin!(disconnected);

        self.state = HandlerState::Streaming;
        tracing::debug!(
            session_id = self.session_id,
            subscriber = self.subscription.id(),
            boundary = %self.writer.boundary(),
            "Streaming started"
        );

        let start_time = unix_seconds().to_string();
        let timeout = self.write_timeout;
        let mut last_sequence = None;

        let reason = loop {
            if !self.frame_interval.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.frame_interval) => {}
                    _ = &mut disconnected => break CloseReason::Disconnected,
                }
            }

            let frame = tokio::select! {
                frame = self.subscription.recv() => frame,
                _ = &mut disconnected => break CloseReason::Disconnected,
            };
            let Some(frame) = frame else {
                break CloseReason::StreamClosed;
            };

            match self.write_frame(&frame, &start_time).await {
                Ok(written) => {
                    self.stats.on_frame(frame.sequence, last_sequence, written);
                    last_sequence = Some(frame.sequence);
                }
                Err(e) => {
                    tracing::debug!(
                        session_id = self.session_id,
                        sequence = frame.sequence,
                        error = %e,
                        "Frame write failed"
                    );
                    // Best-effort delivery of whatever was buffered
                    let _ = with_deadline(timeout, self.writer.flush()).await;
                    break CloseReason::WriteFailed;
                }
            }
        };

        self.state = HandlerState::Closing;
        self.broadcaster.unsubscribe(&self.subscription);

        // A broken connection gets no terminal boundary
        if reason != CloseReason::WriteFailed {
            if let Err(e) = with_deadline(timeout, self.writer.close()).await {
                tracing::debug!(
                    session_id = self.session_id,
                    error = %e,
                    "Failed to close multipart body"
                );
            }
        }

        tracing::debug!(
            session_id = self.session_id,
            state = ?self.state,
            reason = ?reason,
            frames = self.stats.frames_sent,
            "Streaming stopped"
        );

        self.stats.duration = started.elapsed();
        self.stats.calculate_bitrate();
        self.stats
    }

    /// Write one JPEG part and flush it
    async fn write_frame(&mut self, frame: &Frame, start_time: &str) -> Result<usize> {
        let length = frame.len().to_string();
        let timestamp = unix_seconds().to_string();
        let headers = [
            ("Content-Type", "image/jpeg"),
            ("Content-Length", length.as_str()),
            ("X-StartTime", start_time),
            ("X-TimeStamp", timestamp.as_str()),
        ];

        let writer = &mut self.writer;
        let write = async {
            let written = writer.write_part(&headers, &frame.data).await?;
            writer.flush().await?;
            Ok::<_, io::Error>(written)
        };

        with_deadline(self.write_timeout, write)
            .await
            .map_err(Error::ConnectionWriteFailed)
    }
}

/// Bound an I/O future by an optional deadline
async fn with_deadline<T, F>(limit: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write deadline exceeded"))?,
        None => fut.await,
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
