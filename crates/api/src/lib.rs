//! Gatehouse HTTP front end.
//!
//! Exposes config, state, error mapping, extractors and routes so the
//! binary and the integration tests build the same application.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
