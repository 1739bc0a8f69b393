//! Live job status broadcast.

pub mod bus;

pub use bus::{EventBus, JobEventStatus, JobStatusEvent};
