use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use gatehouse_core::error::CoreError;
use gatehouse_dispatch::{AdmissionError, DispatchError};

/// Application-level error type for HTTP handlers.
///
/// Produces `{"error": ..., "code": ...}` bodies. Internal and database
/// failures are logged and surfaced without detail.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type AppResult<T> = Result<T, AppError>;

type Classified = (StatusCode, &'static str, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Dispatch(err) => classify_dispatch_error(err),
            AppError::Database(err) => classify_sqlx_error(err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });
        (status, axum::Json(body)).into_response()
    }
}

fn internal(detail: &str) -> Classified {
    tracing::error!(error = %detail, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

fn classify_core_error(err: &CoreError) -> Classified {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
        CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
        CoreError::Internal(msg) => internal(msg),
    }
}

fn classify_dispatch_error(err: &DispatchError) -> Classified {
    match err {
        DispatchError::Admission(admission) => match admission {
            AdmissionError::QueueFull { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "QUEUE_FULL", admission.to_string())
            }
            AdmissionError::OverflowFull { .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "OVERFLOW_FULL", admission.to_string())
            }
            AdmissionError::Banned => (StatusCode::FORBIDDEN, "BANNED", admission.to_string()),
        },
        DispatchError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        DispatchError::InsufficientCredits { .. } => (
            StatusCode::PAYMENT_REQUIRED,
            "INSUFFICIENT_CREDITS",
            err.to_string(),
        ),
        DispatchError::ContentRejected(_) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "CONTENT_REJECTED",
            err.to_string(),
        ),
        DispatchError::Worker(_) => (StatusCode::BAD_GATEWAY, "WORKER_FAILED", err.to_string()),
        DispatchError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "JOB_TIMEOUT", err.to_string()),
        DispatchError::Database(db) => classify_sqlx_error(db),
        DispatchError::Queue(queue) => {
            tracing::error!(error = %queue, "Broker error");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "QUEUE_UNAVAILABLE",
                "The job queue is unavailable".to_string(),
            )
        }
        DispatchError::Internal(msg) => internal(msg),
    }
}

/// `RowNotFound` maps to 404, everything else to an opaque 500.
fn classify_sqlx_error(err: &sqlx::Error) -> Classified {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        other => {
            tracing::error!(error = %other, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn admission_rejections_map_to_client_errors() {
        assert_eq!(
            status_of(DispatchError::from(AdmissionError::QueueFull { ceiling: 1 }).into()),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_of(DispatchError::from(AdmissionError::Banned).into()),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn settlement_errors_map_to_gateway_statuses() {
        assert_eq!(
            status_of(DispatchError::Worker("oom".into()).into()),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_of(DispatchError::Timeout.into()), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_of(DispatchError::InsufficientCredits { required: 3 }.into()),
            StatusCode::PAYMENT_REQUIRED
        );
    }

    #[test]
    fn internal_errors_are_opaque() {
        let response = AppError::Dispatch(DispatchError::Internal("ledger exploded".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
