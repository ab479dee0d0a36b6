//! Event model: typed payloads, event types and topics.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use flowgate_core::epoch_millis;
use flowgate_state::{
    EventRecord, FeedbackRecord, Flow, FlowStatistics, PickerMatch, RolloutStrategy, UseCase,
};

use crate::diff::{changed_fields, changed_fields_from_empty};
use crate::error::{EventError, EventResult};

/// Topic names. One in-memory channel exists per topic.
pub mod topics {
    pub const USE_CASE: &str = "use_case";
    pub const FLOW: &str = "flow";
    pub const FLOW_STATISTICS: &str = "flow_statistics";
    pub const PICKER_MATCH: &str = "picker_match";
    pub const ROLLOUT_STRATEGY: &str = "rollout_strategy";
    pub const FEEDBACK: &str = "feedback";

    pub const ALL: [&str; 6] = [USE_CASE, FLOW, FLOW_STATISTICS, PICKER_MATCH, ROLLOUT_STRATEGY, FEEDBACK];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    UseCaseCreated,
    UseCaseUpdated,
    FlowCreated,
    FlowUpdated,
    FlowStatisticsCreated,
    FlowStatisticsUpdated,
    PickerMatchCreated,
    RolloutStrategyCreated,
    RolloutStrategyUpdated,
    FeedbackCreated,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        EventType::UseCaseCreated,
        EventType::UseCaseUpdated,
        EventType::FlowCreated,
        EventType::FlowUpdated,
        EventType::FlowStatisticsCreated,
        EventType::FlowStatisticsUpdated,
        EventType::PickerMatchCreated,
        EventType::RolloutStrategyCreated,
        EventType::RolloutStrategyUpdated,
        EventType::FeedbackCreated,
    ];

    /// Stable name stored in the durable log.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UseCaseCreated => "use_case.created",
            EventType::UseCaseUpdated => "use_case.updated",
            EventType::FlowCreated => "flow.created",
            EventType::FlowUpdated => "flow.updated",
            EventType::FlowStatisticsCreated => "flow_statistics.created",
            EventType::FlowStatisticsUpdated => "flow_statistics.updated",
            EventType::PickerMatchCreated => "picker_match.created",
            EventType::RolloutStrategyCreated => "rollout_strategy.created",
            EventType::RolloutStrategyUpdated => "rollout_strategy.updated",
            EventType::FeedbackCreated => "feedback.created",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// The topic events of this type are published on.
    pub fn topic(&self) -> &'static str {
        match self {
            EventType::UseCaseCreated | EventType::UseCaseUpdated => topics::USE_CASE,
            EventType::FlowCreated | EventType::FlowUpdated => topics::FLOW,
            EventType::FlowStatisticsCreated | EventType::FlowStatisticsUpdated => {
                topics::FLOW_STATISTICS
            }
            EventType::PickerMatchCreated => topics::PICKER_MATCH,
            EventType::RolloutStrategyCreated | EventType::RolloutStrategyUpdated => {
                topics::ROLLOUT_STRATEGY
            }
            EventType::FeedbackCreated => topics::FEEDBACK,
        }
    }
}

/// The entity an event carries.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    UseCase(UseCase),
    Flow(Flow),
    FlowStatistics(FlowStatistics),
    PickerMatch(PickerMatch),
    RolloutStrategy(RolloutStrategy),
    Feedback(FeedbackRecord),
}

impl EventPayload {
    /// Serialize the bare entity (no variant tag).
    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            EventPayload::UseCase(v) => serde_json::to_value(v),
            EventPayload::Flow(v) => serde_json::to_value(v),
            EventPayload::FlowStatistics(v) => serde_json::to_value(v),
            EventPayload::PickerMatch(v) => serde_json::to_value(v),
            EventPayload::RolloutStrategy(v) => serde_json::to_value(v),
            EventPayload::Feedback(v) => serde_json::to_value(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_id: Uuid,
    /// Unix milliseconds.
    pub event_time: u64,
    pub event_type: EventType,
    pub entity: EventPayload,
    /// Names of the entity fields this event changed.
    pub changes: Vec<String>,
}

impl Event {
    pub fn new(event_type: EventType, entity: EventPayload, changes: Vec<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_time: epoch_millis(),
            event_type,
            entity,
            changes,
        }
    }

    /// An event for a newly created entity; `changes` lists every field
    /// that differs from the entity's empty value.
    pub fn created(event_type: EventType, entity: EventPayload) -> EventResult<Self> {
        let value = entity
            .to_value()
            .map_err(|e| EventError::Serialize(e.to_string()))?;
        Ok(Self::new(event_type, entity, changed_fields_from_empty(&value)))
    }

    /// An event for a modified entity; `changes` is the field diff between
    /// the two snapshots.
    pub fn updated(event_type: EventType, before: &EventPayload, after: EventPayload) -> EventResult<Self> {
        let serialize = |e: serde_json::Error| EventError::Serialize(e.to_string());
        let old = before.to_value().map_err(serialize)?;
        let new = after.to_value().map_err(serialize)?;
        Ok(Self::new(event_type, after, changed_fields(&old, &new)))
    }

    pub fn has_change(&self, field: &str) -> bool {
        self.changes.iter().any(|c| c == field)
    }

    /// Durable form of this event for the given topic.
    pub fn to_record(&self, topic: &str) -> EventResult<EventRecord> {
        let entity = self
            .entity
            .to_value()
            .map_err(|e| EventError::Serialize(e.to_string()))?;
        Ok(EventRecord {
            event_id: self.event_id.to_string(),
            event_time: self.event_time,
            topic: topic.to_string(),
            event_type: self.event_type.as_str().to_string(),
            entity,
            changes: self.changes.clone(),
        })
    }
}
