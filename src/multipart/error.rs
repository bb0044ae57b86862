use thiserror::Error;

/// Errors raised while framing or decoding a multipart body.
///
/// Every variant except [`MultipartError::Decode`] is fatal to the remaining
/// body parts of a transaction: once the framing is lost there is no safe way
/// to resynchronize on the next boundary.
#[derive(Error, Debug)]
pub enum MultipartError {
    #[error("expected multipart/* content type, got {0:?}")]
    NotMultipart(String),

    #[error("boundary missing from content type {0:?}")]
    MissingBoundary(String),

    #[error("boundary {0:?} is too long (70 chars max)")]
    BoundaryTooLong(String),

    #[error("invalid boundary {found:?}, expected {expected:?}")]
    InvalidBoundary { found: String, expected: String },

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("header field exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    #[error("malformed body part: {0}")]
    MalformedBody(String),

    #[error("stream ended before the closing boundary")]
    UnexpectedEof,

    #[error("decode error: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MultipartError {
    /// True for errors that only concern the payload of one part.
    pub fn is_isolated(&self) -> bool {
        matches!(self, MultipartError::Decode(_))
    }
}
