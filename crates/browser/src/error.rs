//! Browser pool error types.

use thiserror::Error;

/// Errors that can occur during browser pool operations. These are returned
/// as values to callers; the pool never panics into a caller loop.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no browser instance: {0}")]
    NotFound(String),

    #[error("browser launch failed: {0}")]
    LaunchFailed(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("screenshot failed: {0}")]
    ScreenshotFailed(String),

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("no element matching {0:?}")]
    ElementNotFound(String),

    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("pool at capacity and eviction failed")]
    Capacity,

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<chromiumoxide::error::CdpError> for Error {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        Error::Cdp(err.to_string())
    }
}
