//! Request extractors enforcing authentication.
//!
//! - [`auth::AuthUser`] -- end user from a bearer token.
//! - [`worker::WorkerAuth`] -- worker callbacks carrying the shared secret.

pub mod auth;
pub mod worker;
