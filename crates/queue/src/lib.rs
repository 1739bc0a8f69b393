//! Broker and claim-marker plumbing between gatehouse and the worker fleet.
//!
//! Both concerns sit behind traits with a Redis implementation for
//! multi-node deployments and an in-memory one for single-node setups and
//! tests.

pub mod broker;
pub mod claim;
pub mod envelope;
pub mod error;

pub use broker::{Broker, InMemoryBroker, PublishedMessage, RedisBroker};
pub use claim::{ClaimStore, InMemoryClaimStore, RedisClaimStore};
pub use envelope::JobEnvelope;
pub use error::QueueError;
