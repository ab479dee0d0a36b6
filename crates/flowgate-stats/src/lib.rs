//! flowgate-stats: per-flow traffic and feedback counters.
//!
//! The aggregator folds picker matches and feedback into each flow's
//! `FlowStatistics` and republishes every change on the `flow_statistics`
//! topic, where the rollout controller picks it up.
//!
//! # Architecture
//!
//! ```text
//! picker_match ──▶ record_match()    ─┐
//! feedback     ──▶ record_feedback() ─┼─▶ flow_statistics.updated
//! flow.created ──▶ bootstrap()       ─┘   flow_statistics.created
//! ```

pub mod aggregator;
pub mod error;

pub use aggregator::StatisticsAggregator;
pub use error::{StatsError, StatsResult};
