//! Per-client frame streaming: codec, adaptive settings, producer engine.
//!
//! One [`engine::StreamEngine`] runs per connected socket. It paces
//! screenshot capture close to the client's target fps, compresses frames
//! through [`codec`], and emits them on a bounded channel where frames are
//! volatile (dropped under backpressure). Quality and fps adapt to observed
//! pacing and client latency reports.

pub mod codec;
pub mod engine;
pub mod error;
pub mod settings;

pub use {
    engine::{EngineControl, FrameSource, StreamEngine, StreamState},
    error::{Error, Result},
    settings::{ConnectionClass, DeviceClass, StreamLimits, StreamSettings},
};
