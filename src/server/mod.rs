//! HTTP server side of the MJPEG stream
//!
//! - [`MjpegServer`] serves the stream route with axum
//! - [`StreamHandler`] streams one subscription to one client

pub mod config;
pub mod handler;
pub mod listener;

pub use config::ServerConfig;
pub use handler::{HandlerState, StreamHandler};
pub use listener::MjpegServer;
