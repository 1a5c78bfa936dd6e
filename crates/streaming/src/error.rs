//! Streaming error types.

use thiserror::Error;

/// Errors from the codec and the stream engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("capture failed: {0}")]
    Capture(String),

    #[error("stream closed")]
    StreamClosed,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::Codec(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Codec(err.to_string())
    }
}
