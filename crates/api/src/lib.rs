//! Stemflow API server library.
//!
//! Exposes config, state, error handling, routes, the WebSocket transport
//! and the notification relay so integration tests and the binary
//! entrypoint can both access them.

pub mod app;
pub mod config;
pub mod error;
pub mod relay;
pub mod routes;
pub mod stages;
pub mod state;
pub mod ws;
