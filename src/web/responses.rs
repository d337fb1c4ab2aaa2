use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, warn};

/// Canonical JSON payload for error responses.
#[derive(Debug, Serialize, Clone)]
pub struct ApiMessage {
    pub message: String,
}

impl ApiMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Helper for controllers that need to return `(StatusCode, Json<ApiMessage>)`.
pub fn json_error(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ApiMessage>) {
    (status, Json(ApiMessage::new(message)))
}

/// Failure taxonomy for the journal API. Each variant maps to a distinct
/// status code so operators can tell "the model misbehaved" from "the
/// database is down".
#[derive(Debug)]
pub enum ApiError {
    /// Missing or malformed required input; rejected before any network call.
    Validation(String),
    /// The requested record does not exist for that user.
    NotFound(String),
    /// Completion service unreachable, timed out, or returned a non-success
    /// status. Not retried.
    Upstream(anyhow::Error),
    /// Completion service answered, but the content failed structural
    /// validation. Keeps the raw text for diagnostics.
    MalformedRecap {
        reason: String,
        raw: String,
    },
    /// Persistence read/write/delete failure. Terminal for the operation.
    Store(anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::MalformedRecap { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Store(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Validation(message) => message,
            ApiError::NotFound(message) => message,
            ApiError::Upstream(err) => {
                error!(?err, "completion service call failed");
                format!("completion service failure: {err}")
            }
            ApiError::MalformedRecap { reason, raw } => {
                warn!(%reason, raw_text = %raw, "rejected malformed recap output");
                format!("completion output failed validation: {reason}")
            }
            ApiError::Store(err) => {
                error!(?err, "store operation failed");
                "storage failure".to_string()
            }
        };

        json_error(status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_map_to_distinct_statuses() {
        assert_eq!(
            ApiError::validation("missing userId").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::NotFound("gone".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Upstream(anyhow::anyhow!("down")).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::MalformedRecap {
                reason: "missing totalEntries".into(),
                raw: "{}".into(),
            }
            .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::Store(anyhow::anyhow!("io")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
