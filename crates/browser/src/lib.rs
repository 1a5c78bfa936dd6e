//! Bounded pool of headless Chromium instances driven over CDP.
//!
//! Each connected client owns one instance for the lifetime of its socket.
//! The pool enforces a hard capacity (evicting the least-recently-active
//! instance when full), reaps idle instances, and executes the closed set of
//! input actions ([`BrowserAction`]) against a named instance.

pub mod error;
pub mod index;
pub mod pool;
pub mod types;

pub use {
    error::{Error, Result},
    pool::BrowserPool,
    types::{BrowserAction, ImageFormat, LaunchConfig, MouseButton, SnapshotOptions, Viewport},
};
