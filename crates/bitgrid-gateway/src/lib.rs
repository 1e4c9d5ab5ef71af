//! Real-time grid gateway.
//!
//! Hosts the HTTP + WebSocket server, owns the live session set through the
//! hub, and fans grid changes out to every connected viewer.

pub mod api;
pub mod commands;
pub mod connection;
pub mod hub;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod session;
pub mod state;
pub mod throttle;

pub use hub::{ClientInfo, Hub};
pub use server::{router, start_gateway};
pub use state::{open_grid, GatewayState};
