//! Motion-JPEG stream decoding
//!
//! Turns a `multipart/x-mixed-replace` byte stream (from a file, socket or
//! HTTP response) back into individual images:
//! - [`FrameDecoder::decode`] yields decoded `image::DynamicImage`s
//! - [`FrameDecoder::next_frame`] yields the raw JPEG bytes

pub mod config;
pub mod mjpeg;

pub use config::DecoderConfig;
pub use mjpeg::{parse_boundary, FrameDecoder, ResponseBody};
