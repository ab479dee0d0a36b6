//! Process assembly: store, bus, subscribers, jobs and the API server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use flowgate_api::{ApiState, build_router};
use flowgate_core::FlowgateConfig;
use flowgate_events::{BusConfig, EventBus};
use flowgate_jobs::{CorrelationCleanup, EventRetention, JobRunner, RolloutTick};
use flowgate_picker::Picker;
use flowgate_rollout::RolloutController;
use flowgate_state::StateStore;
use flowgate_stats::StatisticsAggregator;

/// Every long-lived component of one Flowgate instance.
pub struct App {
    pub config: FlowgateConfig,
    pub store: StateStore,
    pub bus: EventBus,
    pub picker: Arc<Picker>,
    pub rollout: Arc<RolloutController>,
    pub aggregator: Arc<StatisticsAggregator>,
}

impl App {
    /// Open the on-disk store under `storage.data_dir` and build the
    /// components around it.
    pub fn open(config: FlowgateConfig) -> anyhow::Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.storage.data_dir)?;
        let db_path = config.storage.db_path();
        let store = StateStore::open(&db_path)?;
        info!(path = ?db_path, "state store opened");
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: FlowgateConfig, store: StateStore) -> Self {
        let bus = EventBus::new(BusConfig::from(&config.events));
        let picker = Arc::new(Picker::new(store.clone(), bus.clone(), &config.picker));
        let rollout = Arc::new(RolloutController::new(store.clone(), bus.clone()));
        let aggregator = Arc::new(StatisticsAggregator::new(store.clone(), bus.clone()));
        Self {
            config,
            store,
            bus,
            picker,
            rollout,
            aggregator,
        }
    }

    /// Subscribe the statistics aggregator and the rollout controller.
    pub fn attach(&self) -> anyhow::Result<Vec<JoinHandle<()>>> {
        let mut workers = Arc::clone(&self.aggregator).attach()?;
        workers.extend(Arc::clone(&self.rollout).attach()?);
        Ok(workers)
    }

    pub fn router(&self) -> Router {
        build_router(ApiState {
            picker: Arc::clone(&self.picker),
            rollout: Arc::clone(&self.rollout),
            request_timeout: self.config.server.request_timeout(),
        })
    }

    /// Start the periodic jobs; they stop when `shutdown` changes.
    pub fn spawn_jobs(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let jobs = &self.config.jobs;
        let runner = JobRunner::new(self.store.clone(), jobs.instance_id.clone());
        vec![
            runner.spawn(CorrelationCleanup::new(Arc::clone(&self.picker), jobs), shutdown.clone()),
            runner.spawn(
                EventRetention::new(self.store.clone(), &self.config.events, jobs),
                shutdown.clone(),
            ),
            runner.spawn(RolloutTick::new(Arc::clone(&self.rollout), jobs), shutdown),
        ]
    }

    /// Close the bus and wait for the subscriber loops to drain.
    pub async fn close(&self, workers: Vec<JoinHandle<()>>) {
        self.bus.close();
        for worker in workers {
            let _ = worker.await;
        }
    }
}

/// Run the daemon until Ctrl-C.
pub async fn serve(config: FlowgateConfig) -> anyhow::Result<()> {
    info!(instance = %config.jobs.instance_id, "Flowgate daemon starting");

    let app = App::open(config)?;
    let workers = app.attach()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let jobs = app.spawn_jobs(shutdown_rx);

    let addr = SocketAddr::from(([0, 0, 0, 0], app.config.server.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.router())
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl-C");
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    for job in jobs {
        let _ = job.await;
    }
    app.close(workers).await;

    info!("Flowgate daemon stopped");
    Ok(())
}
