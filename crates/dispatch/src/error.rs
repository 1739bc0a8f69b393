//! Dispatch error taxonomy.
//!
//! Admission, validation, insufficient credit and content rejections have
//! no side effects. Worker failures and timeouts are raised only after the
//! job was finalized and refunded.

use gatehouse_core::error::CoreError;
use gatehouse_core::types::Credits;
use gatehouse_db::LedgerError;
use gatehouse_queue::QueueError;

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("Too many jobs in flight (limit {ceiling})")]
    QueueFull { ceiling: u32 },

    #[error("User is banned")]
    Banned,

    #[error("Overflow queue is full ({size} waiting)")]
    OverflowFull { size: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Insufficient credits: {required} required")]
    InsufficientCredits { required: Credits },

    #[error("Content rejected: {0}")]
    ContentRejected(String),

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("Job timed out")]
    Timeout,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<LedgerError> for DispatchError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Database(e) => DispatchError::Database(e),
            LedgerError::Inconsistent(msg) => DispatchError::Internal(msg),
        }
    }
}

impl From<CoreError> for DispatchError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => DispatchError::Validation(msg),
            other => DispatchError::Internal(other.to_string()),
        }
    }
}

impl DispatchError {
    /// Errors raised before anything was debited or created.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            DispatchError::Admission(_)
                | DispatchError::Validation(_)
                | DispatchError::InsufficientCredits { .. }
                | DispatchError::ContentRejected(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_validation_maps_to_validation() {
        let err: DispatchError = CoreError::Validation("width".into()).into();
        assert!(matches!(err, DispatchError::Validation(ref m) if m == "width"));
        assert!(err.is_rejection());
    }

    #[test]
    fn ledger_inconsistency_is_internal() {
        let err: DispatchError = LedgerError::Inconsistent("row drift".into()).into();
        assert!(matches!(err, DispatchError::Internal(_)));
        assert!(!err.is_rejection());
    }
}
