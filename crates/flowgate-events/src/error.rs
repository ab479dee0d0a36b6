//! Event bus error types.

use thiserror::Error;

pub type EventResult<T> = Result<T, EventError>;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event bus is closed")]
    Closed,

    #[error("unsupported event type: {0}")]
    UnsupportedEventType(String),

    #[error("event payload for {event_type} could not be decoded: {reason}")]
    Decode { event_type: String, reason: String },

    #[error("event serialization error: {0}")]
    Serialize(String),

    #[error("state store error: {0}")]
    State(#[from] flowgate_state::StateError),
}
