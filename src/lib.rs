//! Motion-JPEG streaming over HTTP
//!
//! A producer publishes JPEG frames to a [`FrameBroadcaster`]; every HTTP
//! client connected to an [`MjpegServer`] receives them as parts of a
//! `multipart/x-mixed-replace` response. [`FrameDecoder`] reads such a
//! stream back into images.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mjpeg_rs::{FrameBroadcaster, MjpegServer, ServerConfig};
//!
//! # async fn run(jpeg: Vec<u8>) -> mjpeg_rs::Result<()> {
//! let broadcaster = Arc::new(FrameBroadcaster::new());
//! let server = MjpegServer::new(ServerConfig::default(), Arc::clone(&broadcaster));
//!
//! tokio::spawn(async move { server.run().await });
//!
//! broadcaster.publish(jpeg)?;
//! # Ok(())
//! # }
//! ```

pub mod broadcast;
pub mod decoder;
pub mod error;
pub mod multipart;
pub mod server;
pub mod stats;

pub use broadcast::{Frame, FrameBroadcaster, Subscription};
pub use decoder::{DecoderConfig, FrameDecoder};
pub use error::{Error, Result};
pub use server::{MjpegServer, ServerConfig, StreamHandler};
