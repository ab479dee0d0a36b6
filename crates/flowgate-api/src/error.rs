//! Mapping of component errors onto HTTP responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use flowgate_picker::PickerError;
use flowgate_rollout::RolloutError;

use crate::handlers::ApiResponse;

/// An error on its way out of a handler: a stable code plus the message
/// shown to the caller.
#[derive(Debug)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::new("timeout", "request timed out")
    }

    pub fn status(&self) -> StatusCode {
        status_for(self.code)
    }
}

/// HTTP status of an error code.
pub fn status_for(code: &str) -> StatusCode {
    match code {
        "not-found"
        | "use-case-not-found"
        | "use-case-step-not-found"
        | "rollout-strategy-not-found"
        | "flow-statistics-not-found" => StatusCode::NOT_FOUND,
        "use-case-not-active"
        | "correlation-conflict"
        | "transition-not-allowed"
        | "not-editable-while-active"
        | "duplicate-fallback"
        | "fallback-required"
        | "fallback-in-use"
        | "duplicate-use-case-code" => StatusCode::CONFLICT,
        "flows-not-available" | "fallback-flow-not-available" => StatusCode::SERVICE_UNAVAILABLE,
        "invalid-correlation-id" | "invalid-configuration" | "invalid-request" => StatusCode::BAD_REQUEST,
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn from_component(code: &'static str, detail: String) -> ApiError {
    if status_for(code) == StatusCode::INTERNAL_SERVER_ERROR {
        error!(code, error = %detail, "request failed");
        ApiError::new("internal", "internal error")
    } else {
        ApiError::new(code, detail)
    }
}

impl From<PickerError> for ApiError {
    fn from(e: PickerError) -> Self {
        from_component(e.code(), e.to_string())
    }
}

impl From<RolloutError> for ApiError {
    fn from(e: RolloutError) -> Self {
        from_component(e.code(), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (
            status,
            Json(ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(self.message),
                code: Some(self.code),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_state::{RolloutState, StateError};

    #[test]
    fn codes_map_to_their_status_family() {
        assert_eq!(status_for("use-case-not-found"), StatusCode::NOT_FOUND);
        assert_eq!(status_for("correlation-conflict"), StatusCode::CONFLICT);
        assert_eq!(status_for("fallback-flow-not-available"), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for("invalid-configuration"), StatusCode::BAD_REQUEST);
        assert_eq!(status_for("timeout"), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for("something-else"), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn infrastructure_detail_is_not_exposed() {
        let err: ApiError = PickerError::State(StateError::Write("disk on fire".into())).into();
        assert_eq!(err.code, "internal");
        assert_eq!(err.message, "internal error");
    }

    #[test]
    fn domain_errors_keep_their_message() {
        let err: ApiError = RolloutError::TransitionNotAllowed {
            from: RolloutState::Escaped,
            to: RolloutState::Init,
        }
        .into();
        assert_eq!(err.code, "transition-not-allowed");
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert!(err.message.contains("not allowed"));
    }

    #[test]
    fn deadline_from_the_store_is_a_timeout() {
        let err: ApiError = RolloutError::State(StateError::DeadlineExceeded).into();
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
