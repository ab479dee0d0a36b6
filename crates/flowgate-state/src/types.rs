//! Domain types for the Flowgate state store.
//!
//! These types represent the persisted state of use cases, flows, their
//! statistics and rollout strategies, plus the picker's correlation cache
//! and audit trail. All types are serializable to/from JSON for storage in
//! redb tables.

use std::fmt;

use serde::{Deserialize, Serialize};

pub type UseCaseId = String;
pub type UseCaseStepId = String;
pub type FlowId = String;
pub type FlowStepId = String;
pub type CorrelationId = String;

// ── Use cases ───────────────────────────────────────────────────────

/// A named routing domain with one or more flows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UseCase {
    pub id: UseCaseId,
    /// Caller-facing lookup code, unique across use cases.
    pub code: String,
    pub name: String,
    pub active: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl UseCase {
    pub fn table_key(&self) -> String {
        self.id.clone()
    }
}

/// One step of a use case; every flow materializes it as a `FlowStep`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UseCaseStep {
    pub id: UseCaseStepId,
    pub use_case_id: UseCaseId,
    pub code: String,
    pub name: String,
}

impl UseCaseStep {
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.use_case_id, self.id)
    }
}

// ── Flows ───────────────────────────────────────────────────────────

/// One traffic variant within a use case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flow {
    pub id: FlowId,
    pub use_case_id: UseCaseId,
    pub name: String,
    pub active: bool,
    /// At most one flow per use case carries this flag.
    pub fallback: bool,
    /// Share of traffic (0-100). Treated as a weight by the picker.
    pub current_serve_pct: f64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Flow {
    pub fn table_key(&self) -> String {
        flow_key(&self.use_case_id, &self.id)
    }
}

pub fn flow_key(use_case_id: &str, flow_id: &str) -> String {
    format!("{use_case_id}:{flow_id}")
}

/// Per-(flow, use case step) configuration returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowStep {
    pub id: FlowStepId,
    pub flow_id: FlowId,
    pub use_case_step_id: UseCaseStepId,
    /// Opaque configuration/output payload.
    pub output: serde_json::Value,
    /// Placeholder tokens the payload declares.
    #[serde(default)]
    pub placeholders: Vec<String>,
}

impl FlowStep {
    pub fn table_key(&self) -> String {
        flow_step_key(&self.flow_id, &self.use_case_step_id)
    }
}

pub fn flow_step_key(flow_id: &str, use_case_step_id: &str) -> String {
    format!("{flow_id}:{use_case_step_id}")
}

/// Traffic and feedback counters for one flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowStatistics {
    pub flow_id: FlowId,
    pub use_case_id: UseCaseId,
    pub tot_requests: u64,
    /// Number of distinct correlations (sessions) served.
    pub tot_session_requests: u64,
    pub tot_feedback: u64,
    pub avg_score: f64,
    pub updated_at: u64,
}

impl FlowStatistics {
    pub fn zeroed(flow: &Flow, now: u64) -> Self {
        Self {
            flow_id: flow.id.clone(),
            use_case_id: flow.use_case_id.clone(),
            tot_requests: 0,
            tot_session_requests: 0,
            tot_feedback: 0,
            avg_score: 0.0,
            updated_at: now,
        }
    }
}

// ── Picker ──────────────────────────────────────────────────────────

/// Pins a caller-supplied correlation to the flow it was first assigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PickerCorrelation {
    pub correlation_id: CorrelationId,
    pub use_case_id: UseCaseId,
    pub flow_id: FlowId,
    pub created_at: u64,
}

impl PickerCorrelation {
    /// Whether the correlation is still inside its time-to-live at `now`.
    pub fn is_valid_at(&self, now: u64, ttl_ms: u64) -> bool {
        now.saturating_sub(self.created_at) < ttl_ms
    }
}

/// Write-once audit record of a single pick.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PickerMatch {
    pub id: String,
    pub use_case_id: UseCaseId,
    pub use_case_step_id: UseCaseStepId,
    pub flow_id: FlowId,
    pub flow_step_id: FlowStepId,
    pub correlation_id: CorrelationId,
    pub is_first_correlation: bool,
    pub request: serde_json::Value,
    pub response: serde_json::Value,
    pub created_at: u64,
}

impl PickerMatch {
    pub fn table_key(&self) -> String {
        format!("{:020}:{}", self.created_at, self.id)
    }
}

/// A single feedback submission, as handed over by the feedback intake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedbackRecord {
    pub id: String,
    pub use_case_id: UseCaseId,
    pub flow_id: FlowId,
    pub correlation_id: CorrelationId,
    pub score: f64,
    pub created_at: u64,
}

impl FeedbackRecord {
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.flow_id, self.id)
    }
}

// ── Rollout strategy ────────────────────────────────────────────────

/// Rollout state of a use case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RolloutState {
    Init,
    Warmup,
    Escaped,
    Monitor,
    Adaptive,
    Completed,
    ForcedEscaped,
    ForcedCompleted,
}

impl RolloutState {
    pub const ALL: [RolloutState; 8] = [
        RolloutState::Init,
        RolloutState::Warmup,
        RolloutState::Escaped,
        RolloutState::Monitor,
        RolloutState::Adaptive,
        RolloutState::Completed,
        RolloutState::ForcedEscaped,
        RolloutState::ForcedCompleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RolloutState::Init => "INIT",
            RolloutState::Warmup => "WARMUP",
            RolloutState::Escaped => "ESCAPED",
            RolloutState::Monitor => "MONITOR",
            RolloutState::Adaptive => "ADAPTIVE",
            RolloutState::Completed => "COMPLETED",
            RolloutState::ForcedEscaped => "FORCED_ESCAPED",
            RolloutState::ForcedCompleted => "FORCED_COMPLETED",
        }
    }
}

impl fmt::Display for RolloutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target percentage for one flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowGoal {
    pub flow_id: FlowId,
    pub final_serve_pct: f64,
}

/// Ramp from the current percentages toward the goals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WarmupPhase {
    /// Time-based ramp. Mutually exclusive with `interval_session_reqs`.
    #[serde(default)]
    pub interval_mins: Option<u32>,
    /// Traffic-based ramp: number of sessions over which to converge.
    #[serde(default)]
    pub interval_session_reqs: Option<u64>,
    #[serde(default)]
    pub goals: Vec<FlowGoal>,
}

/// Feedback-triggered rollback rule for one flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EscapeRule {
    pub flow_id: FlowId,
    pub min_feedback: u64,
    pub lower_score: f64,
    pub rollback: Vec<FlowGoal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EscapePhase {
    pub rules: Vec<EscapeRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdaptivePhase {
    pub min_feedback: u64,
    pub max_step_pct: f64,
    pub interval_mins: u32,
}

impl Default for AdaptivePhase {
    fn default() -> Self {
        Self {
            min_feedback: 10,
            max_step_pct: 10.0,
            interval_mins: 60,
        }
    }
}

/// Phase settings of a rollout. Warmup and escape are optional.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RolloutConfiguration {
    #[serde(default)]
    pub warmup: Option<WarmupPhase>,
    #[serde(default)]
    pub escape: Option<EscapePhase>,
    pub adaptive: AdaptivePhase,
}

/// Per-use-case rollout state machine record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolloutStrategy {
    pub use_case_id: UseCaseId,
    pub rollout_state: RolloutState,
    pub configuration: RolloutConfiguration,
    pub created_at: u64,
    pub updated_at: u64,
}

impl RolloutStrategy {
    pub fn new(use_case_id: &str, now: u64) -> Self {
        Self {
            use_case_id: use_case_id.to_string(),
            rollout_state: RolloutState::Init,
            configuration: RolloutConfiguration::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

// ── Infrastructure records ──────────────────────────────────────────

/// Durable form of an event: the entity is kept as opaque JSON and
/// reconstituted by a decoder keyed on `event_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub event_id: String,
    pub event_time: u64,
    pub topic: String,
    pub event_type: String,
    pub entity: serde_json::Value,
    pub changes: Vec<String>,
}

/// Advisory lock row for a periodic job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobLock {
    pub job: String,
    pub owner: String,
    pub acquired_at: u64,
    pub expires_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollout_state_uses_upper_snake_case_on_the_wire() {
        let json = serde_json::to_string(&RolloutState::ForcedEscaped).unwrap();
        assert_eq!(json, "\"FORCED_ESCAPED\"");
        for state in RolloutState::ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json.trim_matches('"'), state.as_str());
        }
    }

    #[test]
    fn configuration_without_optional_phases_parses() {
        let json = r#"{"adaptive":{"min_feedback":5,"max_step_pct":2.5,"interval_mins":30}}"#;
        let config: RolloutConfiguration = serde_json::from_str(json).unwrap();
        assert!(config.warmup.is_none());
        assert!(config.escape.is_none());
        assert_eq!(config.adaptive.min_feedback, 5);
    }

    #[test]
    fn correlation_validity_window() {
        let c = PickerCorrelation {
            correlation_id: "c".into(),
            use_case_id: "uc".into(),
            flow_id: "f".into(),
            created_at: 1_000,
        };
        assert!(c.is_valid_at(1_000, 100));
        assert!(c.is_valid_at(1_099, 100));
        assert!(!c.is_valid_at(1_100, 100));
    }
}
