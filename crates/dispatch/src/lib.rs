//! Admission, dispatch and settlement of generation, upscale and voiceover
//! jobs.
//!
//! [`Services::new`] wires the shared state (throttle, correlation table,
//! event bus) into a [`JobDispatcher`], a [`CallbackProcessor`] and a
//! [`TimeoutWatchdog`].

pub mod admission;
pub mod analytics;
pub mod callback;
pub mod catalog;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod screener;
pub mod services;
pub mod watchdog;

pub use callback::{CallbackOutcome, CallbackProcessor, TIMEOUT_REASON};
pub use config::{ConfigError, DispatchConfig};
pub use dispatcher::{JobDispatcher, JobResult, SubmitOutcome};
pub use error::{AdmissionError, DispatchError};
pub use services::Services;
pub use watchdog::TimeoutWatchdog;
