//! Statistics aggregator: folds matches and feedback into `FlowStatistics`.
//!
//! Every update runs in one store transaction together with the durable
//! `flow_statistics` event it produces. Derived events are published with
//! [`PublishMode::AwaitAck`], so a producer that waits on its own delivery
//! also waits for the rollout reaction downstream.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use flowgate_core::epoch_millis;
use flowgate_events::{
    Event, EventBus, EventHandle, EventHandler, EventPayload, EventResult, EventType, PublishMode,
    topics,
};
use flowgate_state::{FeedbackRecord, Flow, FlowStatistics, PickerMatch, StateRead, StateStore};

use crate::error::{StatsError, StatsResult};

#[derive(Clone)]
pub struct StatisticsAggregator {
    store: StateStore,
    bus: EventBus,
}

impl StatisticsAggregator {
    pub fn new(store: StateStore, bus: EventBus) -> Self {
        Self { store, bus }
    }

    /// Count one pick against its flow. A pick that opened a new
    /// correlation also counts as a new session.
    pub async fn record_match(&self, picker_match: &PickerMatch) -> StatsResult<FlowStatistics> {
        let (stats, handles) = self.store.write(None, |txn| {
            let mut stats = txn
                .statistics(&picker_match.flow_id)?
                .ok_or_else(|| StatsError::StatisticsNotFound(picker_match.flow_id.clone()))?;

            stats.tot_requests += 1;
            let mut changes = vec!["tot_requests".to_string()];
            if picker_match.is_first_correlation {
                stats.tot_session_requests += 1;
                changes.push("tot_session_requests".to_string());
            }
            stats.updated_at = epoch_millis();
            txn.put_statistics(&stats)?;

            let event = Event::new(
                EventType::FlowStatisticsUpdated,
                EventPayload::FlowStatistics(stats.clone()),
                changes,
            );
            let handle = self.bus.persist(txn, topics::FLOW_STATISTICS, event)?;
            Ok::<_, StatsError>((stats, vec![handle]))
        })?;

        debug!(
            flow_id = %stats.flow_id,
            tot_requests = stats.tot_requests,
            tot_session_requests = stats.tot_session_requests,
            "match recorded"
        );
        self.publish(handles).await;
        Ok(stats)
    }

    /// Fold one feedback score into its flow's running average.
    pub async fn record_feedback(&self, feedback: &FeedbackRecord) -> StatsResult<FlowStatistics> {
        let (stats, handles) = self.store.write(None, |txn| {
            let mut stats = txn
                .statistics(&feedback.flow_id)?
                .ok_or_else(|| StatsError::StatisticsNotFound(feedback.flow_id.clone()))?;

            let previous_avg = stats.avg_score;
            stats.tot_feedback += 1;
            stats.avg_score = running_mean(previous_avg, feedback.score, stats.tot_feedback);
            stats.updated_at = epoch_millis();
            txn.put_statistics(&stats)?;

            let mut changes = vec!["tot_feedback".to_string()];
            if stats.avg_score != previous_avg {
                changes.push("avg_score".to_string());
            }
            let event = Event::new(
                EventType::FlowStatisticsUpdated,
                EventPayload::FlowStatistics(stats.clone()),
                changes,
            );
            let handle = self.bus.persist(txn, topics::FLOW_STATISTICS, event)?;
            Ok::<_, StatsError>((stats, vec![handle]))
        })?;

        debug!(
            flow_id = %stats.flow_id,
            tot_feedback = stats.tot_feedback,
            avg_score = stats.avg_score,
            "feedback recorded"
        );
        self.publish(handles).await;
        Ok(stats)
    }

    /// Create zeroed statistics for a new flow. Returns `false` when the
    /// flow already had statistics.
    pub async fn bootstrap(&self, flow: &Flow) -> StatsResult<bool> {
        let handles = self.store.write(None, |txn| {
            if txn.statistics(&flow.id)?.is_some() {
                return Ok::<_, StatsError>(Vec::new());
            }
            let stats = FlowStatistics::zeroed(flow, epoch_millis());
            txn.put_statistics(&stats)?;
            let event = Event::created(
                EventType::FlowStatisticsCreated,
                EventPayload::FlowStatistics(stats),
            )?;
            Ok(vec![self.bus.persist(txn, topics::FLOW_STATISTICS, event)?])
        })?;

        let created = !handles.is_empty();
        if created {
            info!(flow_id = %flow.id, use_case_id = %flow.use_case_id, "flow statistics created");
        }
        self.publish(handles).await;
        Ok(created)
    }

    /// Store a feedback submission and announce it on the `feedback` topic.
    ///
    /// Entry point for the feedback intake; the counters are updated when
    /// the aggregator's own subscription receives the event.
    pub async fn submit_feedback(&self, feedback: FeedbackRecord, mode: PublishMode) -> StatsResult<()> {
        let handles = self.store.write(None, |txn| {
            if txn.statistics(&feedback.flow_id)?.is_none() {
                return Err(StatsError::StatisticsNotFound(feedback.flow_id.clone()));
            }
            txn.put_feedback(&feedback)?;
            let event = Event::created(EventType::FeedbackCreated, EventPayload::Feedback(feedback.clone()))?;
            Ok(vec![self.bus.persist(txn, topics::FEEDBACK, event)?])
        })?;
        self.bus.publish_with(handles, mode).await?;
        Ok(())
    }

    async fn publish(&self, handles: Vec<EventHandle>) {
        if let Err(e) = self.bus.publish_with(handles, PublishMode::AwaitAck).await {
            warn!(error = %e, "failed to publish statistics events");
        }
    }

    /// Subscribe to the topics the aggregator reacts to and spawn one
    /// supervised loop per topic.
    pub fn attach(self: Arc<Self>) -> EventResult<Vec<JoinHandle<()>>> {
        let mut workers = Vec::new();
        for topic in [topics::PICKER_MATCH, topics::FEEDBACK, topics::FLOW] {
            let subscription = self.bus.subscribe(topic)?;
            workers.push(subscription.spawn(Arc::clone(&self)));
        }
        info!("statistics aggregator attached");
        Ok(workers)
    }
}

impl EventHandler for StatisticsAggregator {
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        match (&event.event_type, &event.entity) {
            (EventType::PickerMatchCreated, EventPayload::PickerMatch(m)) => {
                self.record_match(m).await?;
            }
            (EventType::FeedbackCreated, EventPayload::Feedback(f)) => {
                self.record_feedback(f).await?;
            }
            (EventType::FlowCreated, EventPayload::Flow(flow)) => {
                self.bootstrap(flow).await?;
            }
            _ => {}
        }
        Ok(())
    }
}

fn running_mean(previous: f64, sample: f64, count: u64) -> f64 {
    previous + (sample - previous) / count as f64
}
