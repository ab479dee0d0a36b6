//! The periodic jobs of a Flowgate instance.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use flowgate_core::config::{EventsConfig, JobsConfig};
use flowgate_core::{DAY_MS, epoch_millis};
use flowgate_picker::Picker;
use flowgate_rollout::RolloutController;
use flowgate_state::StateStore;

use crate::runner::Job;

/// Deletes picker correlations older than their time-to-live.
pub struct CorrelationCleanup {
    picker: Arc<Picker>,
    interval: Duration,
}

impl CorrelationCleanup {
    pub fn new(picker: Arc<Picker>, config: &JobsConfig) -> Self {
        Self {
            picker,
            interval: Duration::from_secs(config.correlation_cleanup_secs),
        }
    }
}

impl Job for CorrelationCleanup {
    fn name(&self) -> &'static str {
        "correlation_cleanup"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> anyhow::Result<()> {
        let purged = self.picker.purge_expired_correlations()?;
        debug!(purged, "correlation cleanup finished");
        Ok(())
    }
}

/// Deletes durable events older than the retention window.
pub struct EventRetention {
    store: StateStore,
    retention_ms: u64,
    interval: Duration,
}

impl EventRetention {
    pub fn new(store: StateStore, events: &EventsConfig, config: &JobsConfig) -> Self {
        Self {
            store,
            retention_ms: events.retention_days * DAY_MS,
            interval: Duration::from_secs(config.event_retention_secs),
        }
    }
}

impl Job for EventRetention {
    fn name(&self) -> &'static str {
        "event_retention"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> anyhow::Result<()> {
        let cutoff = epoch_millis().saturating_sub(self.retention_ms);
        let deleted = self.store.write(None, |txn| txn.delete_events_before(cutoff))?;
        if deleted > 0 {
            info!(deleted, cutoff, "expired events deleted");
        }
        Ok(())
    }
}

/// Drives the rollout controller's periodic hook.
pub struct RolloutTick {
    controller: Arc<RolloutController>,
    interval: Duration,
}

impl RolloutTick {
    pub fn new(controller: Arc<RolloutController>, config: &JobsConfig) -> Self {
        Self {
            controller,
            interval: Duration::from_secs(config.rollout_tick_secs),
        }
    }
}

impl Job for RolloutTick {
    fn name(&self) -> &'static str {
        "rollout_tick"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&self) -> anyhow::Result<()> {
        let due = self.controller.tick()?;
        debug!(due, "rollout tick");
        Ok(())
    }
}
