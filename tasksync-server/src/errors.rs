use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tasksync_core::{ErrorBody, SyncError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

/// A [`SyncError`] on its way out of a handler.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub SyncError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Validation(_) | SyncError::Serialization(_) => StatusCode::BAD_REQUEST,
            SyncError::Conflict(_) => StatusCode::CONFLICT,
            SyncError::Transport(_) | SyncError::Cancelled(_) => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::warn!(error = %self.0, %status, "request rejected");
        }

        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasksync_core::TaskId;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (SyncError::NotFound(TaskId::from("t9")), StatusCode::NOT_FOUND),
            (SyncError::validation("empty name"), StatusCode::BAD_REQUEST),
            (SyncError::Conflict(TaskId::from("t1")), StatusCode::CONFLICT),
            (SyncError::transport("upstream"), StatusCode::SERVICE_UNAVAILABLE),
            (SyncError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
