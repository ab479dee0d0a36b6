//! Statistics aggregator errors.

use thiserror::Error;

use flowgate_events::EventError;
use flowgate_state::StateError;

pub type StatsResult<T> = Result<T, StatsError>;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("flow statistics not found for flow {0}")]
    StatisticsNotFound(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Event(#[from] EventError),
}

impl StatsError {
    pub fn code(&self) -> &'static str {
        match self {
            StatsError::StatisticsNotFound(_) => "flow-statistics-not-found",
            StatsError::State(e) => e.code(),
            StatsError::Event(_) => "internal",
        }
    }
}
