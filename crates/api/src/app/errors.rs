use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use labstore_infra::jobs::QueueError;

pub fn queue_error_to_response(err: QueueError) -> axum::response::Response {
    let message = err.to_string();
    match err {
        QueueError::InvalidState { .. } => json_error(StatusCode::CONFLICT, "invalid_state", message),
        QueueError::InvalidTransition { .. } => {
            json_error(StatusCode::BAD_REQUEST, "invalid_transition", message)
        }
        QueueError::ConcurrentModification { .. } => json_error(StatusCode::CONFLICT, "conflict", message),
        QueueError::NotFound(_) => json_error(StatusCode::NOT_FOUND, "not_found", message),
        QueueError::Validation(_) => json_error(StatusCode::BAD_REQUEST, "validation_error", message),
        QueueError::RequestPersist { .. } => {
            tracing::error!(error = %message, "claimed job without a stored request");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "request_persist", message)
        }
        QueueError::MissingId => json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message),
        QueueError::Store(_) => {
            tracing::error!(error = %message, "job store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", message)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use labstore_core::JobId;
    use labstore_infra::jobs::{JobState, JobStoreError};

    #[test]
    fn queue_errors_map_to_statuses() {
        let id = JobId::new();
        let cases = [
            (
                QueueError::InvalidState { id, state: JobState::Complete },
                StatusCode::CONFLICT,
            ),
            (
                QueueError::InvalidTransition {
                    id,
                    from: JobState::Pending,
                    to: JobState::Complete,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                QueueError::ConcurrentModification { id, expected: JobState::Running },
                StatusCode::CONFLICT,
            ),
            (QueueError::NotFound(id), StatusCode::NOT_FOUND),
            (QueueError::Validation("bad".to_string()), StatusCode::BAD_REQUEST),
            (
                QueueError::RequestPersist { id, reason: "x".to_string() },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                QueueError::Store(JobStoreError::Storage("down".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(queue_error_to_response(err).status(), status);
        }
    }
}
