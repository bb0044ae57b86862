//! Framework-independent `multipart/related` parsing.
//!
//! The reader consumes any [`tokio::io::AsyncBufRead`] so the HTTP layer only
//! has to hand over the request's content type and body stream.

pub mod decode;
pub mod error;
pub mod headers;
pub mod mime;
pub mod reader;

pub use error::MultipartError;
pub use headers::{HeaderParser, ParsedHeaders, PartHeaders};
pub use mime::{MediaType, boundary_from_content_type};
pub use reader::{BodyPart, MultipartReader};
