//! Gateway: HTTP + WebSocket control plane for companions.
//!
//! Lifecycle:
//! 1. Load config, ensure a signing key and a password hash exist
//! 2. Build [`server::GatewayServer`] around a [`tether_simulation::SimulationFacade`]
//! 3. `start()` binds the listener and spawns the status broadcaster
//! 4. `stop()` cancels both and closes every WebSocket session
//!
//! The gateway never mutates simulation state; commands are handed to the
//! facade as intents.

pub mod auth;
pub mod broadcast;
pub mod error;
pub mod rest;
pub mod server;
pub mod skins;
pub mod state;
pub mod ws;

#[cfg(test)]
pub(crate) mod test_support;

pub use {
    error::{GatewayError, GatewayResult},
    server::{GatewayServer, build_gateway_app},
    state::{GatewayState, Session, SessionError, SessionRegistry},
};
