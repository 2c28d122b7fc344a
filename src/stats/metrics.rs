//! Statistics for MJPEG sessions and the frame broadcaster

use std::time::Duration;

/// Per-connection statistics, returned when a stream handler exits
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Total bytes written (part headers and bodies)
    pub bytes_sent: u64,
    /// Number of frames written
    pub frames_sent: u64,
    /// Frames published while this session was subscribed but never delivered
    pub skipped_frames: u64,
    /// Connection duration
    pub duration: Duration,
    /// Average send rate (bits/sec)
    pub bitrate: u64,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one frame written to the client
    pub fn on_frame(&mut self, sequence: u64, last_sequence: Option<u64>, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;

        if let Some(last) = last_sequence {
            self.skipped_frames += sequence.saturating_sub(last + 1);
        }
    }

    /// Calculate bitrate from bytes and duration
    pub fn calculate_bitrate(&mut self) {
        let secs = self.duration.as_secs();
        if secs > 0 {
            self.bitrate = (self.bytes_sent * 8) / secs;
        }
    }

    /// Average frames per second over the session
    pub fn framerate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames_sent as f64 / secs
        } else {
            0.0
        }
    }
}

/// Snapshot of broadcaster counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Frames accepted by `publish`
    pub frames_published: u64,
    /// Live subscribers at snapshot time
    pub subscribers: usize,
    /// Whether the broadcaster has been shut down
    pub closed: bool,
}
