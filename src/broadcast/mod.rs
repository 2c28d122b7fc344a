//! Frame broadcaster for live-view fan-out
//!
//! A single producer publishes JPEG frames; every connected client holds a
//! `Subscription` and reads the freshest frame whenever it is ready for one.
//!
//! # Architecture
//!
//! ```text
//!                      Arc<FrameBroadcaster>
//!                 ┌──────────────────────────────┐
//!                 │ live: Mutex<Option<HashMap<  │
//!                 │   id, watch::Sender<Frame>   │
//!                 │ >>>                          │
//!                 └──────────────┬───────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        │                       │                       │
//!        ▼                       ▼                       ▼
//!   [Producer]             [Subscription]          [Subscription]
//!   publish(jpeg)          recv().await            recv().await
//!        │                       │                       │
//!        └──► send_replace() ──► StreamHandler ──► multipart part ──► TCP
//! ```
//!
//! # Backpressure
//!
//! Each subscription has exactly one slot. `publish` overwrites it without
//! waiting, so the producer's cadence is never coupled to the slowest
//! client. A client that falls behind skips straight to the newest frame.
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so all subscribers share the same
//! memory allocation for a published frame.

pub mod broadcaster;
pub mod frame;
pub mod subscription;

pub use broadcaster::FrameBroadcaster;
pub use frame::Frame;
pub use subscription::Subscription;
