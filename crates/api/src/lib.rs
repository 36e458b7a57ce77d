//! Searchcast API server library.
//!
//! Exposes the bridge, the event-stream endpoint and the server building
//! blocks (config, state, error handling, routes) so integration tests and
//! the binary entrypoint can both access them.

pub mod bridge;
pub mod config;
pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
pub mod routes;
pub mod sse;
pub mod state;
