//! Pure domain logic shared by every gatehouse crate.
//!
//! Nothing in here performs I/O. The in-memory concurrency primitives
//! ([`throttle::QueueThrottle`], [`correlation::CorrelationTable`]) are
//! synchronous, mutex-guarded structures safe to share behind an `Arc`.

pub mod callback;
pub mod correlation;
pub mod error;
pub mod job;
pub mod ledger;
pub mod request;
pub mod roles;
pub mod throttle;
pub mod types;
