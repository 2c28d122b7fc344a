//! MIME multipart framing
//!
//! Both directions of the crate speak the same framing: the server writes
//! `multipart/x-mixed-replace` parts and the decoder reads them back.

pub mod boundary;
pub mod reader;
pub mod writer;

pub use boundary::{is_valid_boundary, random_boundary, trim_boundary};
pub use reader::{MultipartReader, Part};
pub use writer::MultipartWriter;
