//! Job trait and the advisory-locked runner loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use flowgate_core::epoch_millis;
use flowgate_state::{StateRead, StateStore};

/// A periodic, idempotent unit of maintenance work.
pub trait Job: Send + Sync + 'static {
    /// Lock name; unique per job kind.
    fn name(&self) -> &'static str;

    fn interval(&self) -> Duration;

    fn run(&self) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Runs jobs on behalf of one instance.
#[derive(Clone)]
pub struct JobRunner {
    store: StateStore,
    instance_id: String,
}

impl JobRunner {
    pub fn new(store: StateStore, instance_id: impl Into<String>) -> Self {
        Self {
            store,
            instance_id: instance_id.into(),
        }
    }

    /// Take the job's lock for one interval. Returns whether this instance
    /// holds it now.
    fn acquire(&self, name: &str, lease: Duration) -> anyhow::Result<bool> {
        let now = epoch_millis();
        let acquired = self.store.write(None, |txn| {
            if let Some(lock) = txn.job_lock(name)?
                && lock.owner == self.instance_id
                && lock.expires_at <= now
            {
                txn.release_job_lock(name, &self.instance_id)?;
                debug!(job = name, "released own stale lock");
            }
            txn.try_acquire_job_lock(name, &self.instance_id, now, lease.as_millis() as u64)
        })?;
        Ok(acquired)
    }

    /// One round: run the job if this instance wins its lock.
    ///
    /// Returns `Ok(false)` when another instance holds the lock.
    pub async fn run_once<J: Job>(&self, job: &J) -> anyhow::Result<bool> {
        if !self.acquire(job.name(), job.interval())? {
            debug!(job = job.name(), instance = %self.instance_id, "lock held elsewhere, skipping");
            return Ok(false);
        }
        job.run().await?;
        debug!(job = job.name(), instance = %self.instance_id, "job round finished");
        Ok(true)
    }

    /// Run `job` every interval until `shutdown` changes. Failures are
    /// logged and retried on the next round.
    pub async fn run<J: Job>(&self, job: Arc<J>, mut shutdown: watch::Receiver<bool>) {
        info!(
            job = job.name(),
            interval_secs = job.interval().as_secs_f64(),
            instance = %self.instance_id,
            "job scheduled"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(job.interval()) => {
                    if let Err(e) = self.run_once(job.as_ref()).await {
                        error!(job = job.name(), error = %e, "job round failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!(job = job.name(), "job shutting down");
                    break;
                }
            }
        }

        let name = job.name();
        if let Err(e) = self
            .store
            .write(None, |txn| txn.release_job_lock(name, &self.instance_id))
        {
            warn!(job = name, error = %e, "failed to release job lock on shutdown");
        }
    }

    /// Spawn [`JobRunner::run`] on a new task.
    pub fn spawn<J: Job>(&self, job: J, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(Arc::new(job), shutdown).await })
    }
}
