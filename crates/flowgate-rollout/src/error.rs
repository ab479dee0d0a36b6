//! Rollout controller errors.

use thiserror::Error;

use flowgate_events::EventError;
use flowgate_state::{RolloutState, StateError};

pub type RolloutResult<T> = Result<T, RolloutError>;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("rollout strategy not found for use case {0}")]
    StrategyNotFound(String),

    #[error("transition from {from} to {to} is not allowed")]
    TransitionNotAllowed { from: RolloutState, to: RolloutState },

    #[error("configuration cannot be edited in state {0}")]
    NotEditableWhileActive(RolloutState),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl RolloutError {
    pub fn code(&self) -> &'static str {
        match self {
            RolloutError::StrategyNotFound(_) => "rollout-strategy-not-found",
            RolloutError::TransitionNotAllowed { .. } => "transition-not-allowed",
            RolloutError::NotEditableWhileActive(_) => "not-editable-while-active",
            RolloutError::InvalidConfiguration(_) => "invalid-configuration",
            RolloutError::State(e) => e.code(),
            RolloutError::Event(_) => "internal",
        }
    }
}
