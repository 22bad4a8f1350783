//! Development stand-in for the Arena backend.
//!
//! Serves the REST endpoints the client polls from in-memory fixtures and
//! runs a minimal STOMP broker for the real-time channel. Exposed as a
//! library so integration tests can start it in-process.

pub mod api;
pub mod broker;
pub mod config;
pub mod server;
pub mod state;
