//! Decoder configuration

use crate::multipart::reader::DEFAULT_MAX_PART_SIZE;

/// Decoder configuration options
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Largest part body accepted before failing with `MalformedPart`
    pub max_part_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_part_size: DEFAULT_MAX_PART_SIZE,
        }
    }
}

impl DecoderConfig {
    /// Set the maximum part size
    pub fn max_part_size(mut self, size: usize) -> Self {
        self.max_part_size = size;
        self
    }
}
