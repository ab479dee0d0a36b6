//! redb table definitions for the Flowgate state store.
//!
//! Each JSON table uses `&str` keys and `&[u8]` values. Composite keys
//! follow `{parent_id}:{child_id}` so children can be prefix-scanned in
//! storage order.

use redb::TableDefinition;

/// Shape shared by every JSON-valued table.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Use cases keyed by `{use_case_id}`.
pub const USE_CASES: JsonTable = TableDefinition::new("use_cases");

/// Use case ids (JSON strings) keyed by use case `{code}`.
pub const USE_CASE_CODES: JsonTable = TableDefinition::new("use_case_codes");

/// Use case steps keyed by `{use_case_id}:{step_id}`.
pub const USE_CASE_STEPS: JsonTable = TableDefinition::new("use_case_steps");

/// Flows keyed by `{use_case_id}:{flow_id}`.
pub const FLOWS: JsonTable = TableDefinition::new("flows");

/// Flow steps keyed by `{flow_id}:{use_case_step_id}`.
pub const FLOW_STEPS: JsonTable = TableDefinition::new("flow_steps");

/// Flow statistics keyed by `{flow_id}`.
pub const FLOW_STATISTICS: JsonTable = TableDefinition::new("flow_statistics");

/// Rollout strategies keyed by `{use_case_id}`.
pub const ROLLOUT_STRATEGIES: JsonTable = TableDefinition::new("rollout_strategies");

/// Picker correlations keyed by `{correlation_id}`.
pub const PICKER_CORRELATIONS: JsonTable = TableDefinition::new("picker_correlations");

/// Picker audit records keyed by `{created_at:020}:{match_id}`.
pub const PICKER_MATCHES: JsonTable = TableDefinition::new("picker_matches");

/// Feedback records keyed by `{flow_id}:{feedback_id}`.
pub const FEEDBACK: JsonTable = TableDefinition::new("feedback");

/// Durable event log keyed by `{event_time:020}:{seq:020}`.
pub const EVENTS: JsonTable = TableDefinition::new("events");

/// Advisory job locks keyed by job name.
pub const JOB_LOCKS: JsonTable = TableDefinition::new("job_locks");

/// Counters (currently only the event sequence).
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

pub const EVENT_SEQ_KEY: &str = "event_seq";
