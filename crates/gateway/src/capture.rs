//! Frame-source implementation over the browser pool.

use std::sync::Arc;

use async_trait::async_trait;

use {
    periscope_browser::{BrowserPool, ImageFormat, SnapshotOptions},
    periscope_streaming::{Error as StreamError, FrameSource},
};

/// Captures viewport rasters for one bound browser instance.
pub struct PoolFrameSource {
    pool: Arc<BrowserPool>,
    browser_id: String,
    format: ImageFormat,
}

impl PoolFrameSource {
    pub fn new(pool: Arc<BrowserPool>, browser_id: impl Into<String>, format: ImageFormat) -> Self {
        Self {
            pool,
            browser_id: browser_id.into(),
            format,
        }
    }
}

#[async_trait]
impl FrameSource for PoolFrameSource {
    async fn capture(&self, quality: u8) -> periscope_streaming::Result<Vec<u8>> {
        self.pool
            .snapshot(
                &self.browser_id,
                SnapshotOptions {
                    format: self.format,
                    quality,
                    full_page: false,
                },
            )
            .await
            .map_err(|e| StreamError::Capture(e.to_string()))
    }
}
