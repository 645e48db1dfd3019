use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Typed outcome of a failed engine operation. Terminals render these as a
/// deterministic operator message; nothing here is a generic fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("token not found")]
    NotFound,

    #[error("invalid transition for {entity}: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },

    #[error("no parking slot available")]
    NoCapacity,

    /// The plate already occupies a slot; a second entry would take another.
    #[error("vehicle already parked in slot {0}")]
    AlreadyParked(String),

    #[error("resource busy, retry")]
    Busy,

    #[error("token code space exhausted")]
    CodeSpaceExhausted,

    #[error("unknown slot {0}")]
    UnknownSlot(Uuid),
}

impl GateError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GateError::Busy)
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Gate(GateError::NotFound) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "token_not_found",
                "token not found".to_string(),
            ),
            AppError::Gate(e @ GateError::InvalidTransition { .. }) => (
                StatusCode::CONFLICT,
                "state_error",
                "invalid_transition",
                e.to_string(),
            ),
            AppError::Gate(GateError::NoCapacity) => (
                StatusCode::CONFLICT,
                "capacity_error",
                "no_capacity",
                "no parking slot available".to_string(),
            ),
            AppError::Gate(e @ GateError::AlreadyParked(_)) => (
                StatusCode::CONFLICT,
                "state_error",
                "already_parked",
                e.to_string(),
            ),
            AppError::Gate(GateError::Busy) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "contention_error",
                "busy",
                "resource busy, retry".to_string(),
            ),
            AppError::Gate(GateError::CodeSpaceExhausted) => {
                tracing::error!("token code space exhausted");
                (
                    StatusCode::INSUFFICIENT_STORAGE,
                    "capacity_error",
                    "code_space_exhausted",
                    "no token codes left to issue".to_string(),
                )
            }
            AppError::Gate(e @ GateError::UnknownSlot(_)) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "slot_not_found",
                e.to_string(),
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "bad_request",
                msg.clone(),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        // Busy is lock contention; the terminal may retry straight away
        if matches!(self, AppError::Gate(GateError::Busy)) {
            response
                .headers_mut()
                .insert("retry-after", axum::http::HeaderValue::from_static("1"));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_busy_is_retryable() {
        assert!(GateError::Busy.is_retryable());
        assert!(!GateError::NotFound.is_retryable());
        assert!(!GateError::NoCapacity.is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        let resp = AppError::from(GateError::Busy).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers().get("retry-after").unwrap(), "1");

        let resp = AppError::from(GateError::NotFound).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = AppError::from(GateError::InvalidTransition {
            entity: "token",
            from: "USED",
            to: "USED",
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = AppError::from(GateError::AlreadyParked("A-01".into())).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert!(resp.headers().get("retry-after").is_none());
    }
}
