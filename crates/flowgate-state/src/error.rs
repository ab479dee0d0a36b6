//! Error types for the Flowgate state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transaction deadline exceeded")]
    DeadlineExceeded,

    #[error("use case {0} already has a fallback flow")]
    DuplicateFallback(String),

    #[error("fallback flow of active use case {0} cannot be removed")]
    FallbackRequired(String),

    #[error("flow {0} is the fallback of an active use case")]
    FallbackInUse(String),

    #[error("use case code {0} is already taken")]
    DuplicateUseCaseCode(String),
}

impl StateError {
    /// Stable error code for the outward-facing boundary.
    pub fn code(&self) -> &'static str {
        match self {
            StateError::NotFound(_) => "not-found",
            StateError::DeadlineExceeded => "timeout",
            StateError::DuplicateFallback(_) => "duplicate-fallback",
            StateError::FallbackRequired(_) => "fallback-required",
            StateError::FallbackInUse(_) => "fallback-in-use",
            StateError::DuplicateUseCaseCode(_) => "duplicate-use-case-code",
            _ => "internal",
        }
    }
}
