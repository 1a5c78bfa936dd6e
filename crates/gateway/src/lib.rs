//! WebSocket gateway: binds each connected client to a browser instance,
//! routes the control protocol, and hosts the per-client stream engines.

pub mod capture;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

pub use {
    server::{build_gateway_app, run},
    state::GatewayState,
};
