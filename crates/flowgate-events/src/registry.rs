//! Decoder registry: turns durable event records back into typed events.
//!
//! The log stores entities as opaque JSON, so replay needs an explicit
//! map from the stored event-type name to a decoder for its payload.

use std::collections::HashMap;

use uuid::Uuid;

use flowgate_state::EventRecord;

use crate::error::{EventError, EventResult};
use crate::event::{Event, EventPayload, EventType};

pub type Decoder = fn(serde_json::Value) -> serde_json::Result<EventPayload>;

#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<&'static str, (EventType, Decoder)>,
}

impl DecoderRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry covering every [`EventType`].
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        for event_type in EventType::ALL {
            registry.register(event_type, standard_decoder(event_type));
        }
        registry
    }

    pub fn register(&mut self, event_type: EventType, decoder: Decoder) {
        self.decoders.insert(event_type.as_str(), (event_type, decoder));
    }

    pub fn supports(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Rebuild the typed event from its durable record.
    pub fn decode(&self, record: &EventRecord) -> EventResult<Event> {
        let (event_type, decoder) = self
            .decoders
            .get(record.event_type.as_str())
            .ok_or_else(|| EventError::UnsupportedEventType(record.event_type.clone()))?;
        let decode_err = |reason: String| EventError::Decode {
            event_type: record.event_type.clone(),
            reason,
        };
        let entity = decoder(record.entity.clone()).map_err(|e| decode_err(e.to_string()))?;
        let event_id = Uuid::parse_str(&record.event_id).map_err(|e| decode_err(e.to_string()))?;
        Ok(Event {
            event_id,
            event_time: record.event_time,
            event_type: *event_type,
            entity,
            changes: record.changes.clone(),
        })
    }
}

fn standard_decoder(event_type: EventType) -> Decoder {
    match event_type {
        EventType::UseCaseCreated | EventType::UseCaseUpdated => {
            |v| serde_json::from_value(v).map(EventPayload::UseCase)
        }
        EventType::FlowCreated | EventType::FlowUpdated => {
            |v| serde_json::from_value(v).map(EventPayload::Flow)
        }
        EventType::FlowStatisticsCreated | EventType::FlowStatisticsUpdated => {
            |v| serde_json::from_value(v).map(EventPayload::FlowStatistics)
        }
        EventType::PickerMatchCreated => |v| serde_json::from_value(v).map(EventPayload::PickerMatch),
        EventType::RolloutStrategyCreated | EventType::RolloutStrategyUpdated => {
            |v| serde_json::from_value(v).map(EventPayload::RolloutStrategy)
        }
        EventType::FeedbackCreated => |v| serde_json::from_value(v).map(EventPayload::Feedback),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::topics;
    use flowgate_state::FlowStatistics;

    fn stats_event() -> Event {
        Event::new(
            EventType::FlowStatisticsUpdated,
            EventPayload::FlowStatistics(FlowStatistics {
                flow_id: "f1".into(),
                use_case_id: "uc1".into(),
                tot_requests: 3,
                tot_session_requests: 2,
                tot_feedback: 1,
                avg_score: 4.0,
                updated_at: 99,
            }),
            vec!["tot_requests".into()],
        )
    }

    #[test]
    fn standard_registry_restores_typed_payload() {
        let event = stats_event();
        let record = event.to_record(topics::FLOW_STATISTICS).unwrap();
        let decoded = DecoderRegistry::standard().decode(&record).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let mut record = stats_event().to_record(topics::FLOW_STATISTICS).unwrap();
        record.event_type = "flow.archived".into();
        let err = DecoderRegistry::standard().decode(&record).unwrap_err();
        assert!(matches!(err, EventError::UnsupportedEventType(t) if t == "flow.archived"));
    }

    #[test]
    fn empty_registry_supports_nothing() {
        let record = stats_event().to_record(topics::FLOW_STATISTICS).unwrap();
        assert!(!DecoderRegistry::empty().supports(&record.event_type));
        assert!(DecoderRegistry::empty().decode(&record).is_err());
    }

    #[test]
    fn mismatched_payload_is_a_decode_error() {
        let mut record = stats_event().to_record(topics::FLOW_STATISTICS).unwrap();
        record.entity = serde_json::json!({"unexpected": true});
        let err = DecoderRegistry::standard().decode(&record).unwrap_err();
        assert!(matches!(err, EventError::Decode { .. }));
    }
}
