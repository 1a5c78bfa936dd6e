//! Session registry: stable client identity across transport reconnects.
//!
//! A session holds the client's streaming preferences and a weak reference
//! to its last browser instance. It never owns the browser — ownership is
//! per-socket and lives in the gateway.

pub mod registry;

pub use registry::{Session, SessionRegistry, SessionSettings};
