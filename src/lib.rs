//! Library crate for arena-back, exposing modules for binaries and integration tests.

pub mod client;
pub mod config;
/// Persistence: entities, the store contract and its backends.
pub mod dao;
/// Request, response and change-feed payloads.
pub mod dto;
/// Service and HTTP error types.
pub mod error;
/// HTTP routers.
pub mod routes;
/// Business operations over the shared state.
pub mod services;
/// Shared application state and the session state machine.
pub mod state;
