//! Picker error types.

use thiserror::Error;

use flowgate_events::EventError;
use flowgate_state::StateError;

pub type PickerResult<T> = Result<T, PickerError>;

#[derive(Debug, Error)]
pub enum PickerError {
    #[error("use case not found: {0}")]
    UseCaseNotFound(String),

    #[error("use case is not active: {0}")]
    UseCaseNotActive(String),

    #[error("use case step not found: {0}")]
    UseCaseStepNotFound(String),

    #[error("correlation {correlation_id} belongs to use case {use_case_id}")]
    CorrelationConflict {
        correlation_id: String,
        use_case_id: String,
    },

    #[error("no flows configured for use case {0}")]
    FlowsNotAvailable(String),

    #[error("no active flow could be selected for use case {0}")]
    FallbackFlowNotAvailable(String),

    #[error("invalid correlation id: {0}")]
    InvalidCorrelationId(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl PickerError {
    pub fn code(&self) -> &'static str {
        match self {
            PickerError::UseCaseNotFound(_) => "use-case-not-found",
            PickerError::UseCaseNotActive(_) => "use-case-not-active",
            PickerError::UseCaseStepNotFound(_) => "use-case-step-not-found",
            PickerError::CorrelationConflict { .. } => "correlation-conflict",
            PickerError::FlowsNotAvailable(_) => "flows-not-available",
            PickerError::FallbackFlowNotAvailable(_) => "fallback-flow-not-available",
            PickerError::InvalidCorrelationId(_) => "invalid-correlation-id",
            PickerError::State(e) => e.code(),
            PickerError::Event(_) => "internal",
        }
    }
}
