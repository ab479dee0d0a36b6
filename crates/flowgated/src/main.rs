//! flowgated: the Flowgate daemon.
//!
//! Single binary that assembles every Flowgate component:
//! - State store (redb)
//! - Event bus with the statistics aggregator and rollout controller
//! - Picker
//! - Periodic jobs (correlation cleanup, event retention, rollout tick)
//! - REST API
//!
//! # Usage
//!
//! ```text
//! flowgated serve --config /etc/flowgate/flowgate.toml --port 8480
//! flowgated seed --file catalog.toml
//! flowgated replay --topic flow_statistics --since 2024-05-01T00:00:00Z --dry-run
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;

use flowgate_core::FlowgateConfig;
use flowgated::app::{self, App};
use flowgated::replay::{self, Printer, ReplayOptions};
use flowgated::{logging, seed};

#[derive(Parser)]
#[command(name = "flowgated", about = "Flowgate daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Common {
    /// Path to flowgate.toml. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for persistent state (overrides `storage.data_dir`).
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the API and run subscribers and jobs until Ctrl-C.
    Serve {
        #[command(flatten)]
        common: Common,

        /// Port to listen on (overrides `server.port`).
        #[arg(long)]
        port: Option<u16>,
    },

    /// Re-deliver stored events to the subscribers. Run against an idle
    /// data directory.
    Replay {
        #[command(flatten)]
        common: Common,

        /// Only replay this topic.
        #[arg(long)]
        topic: Option<String>,

        /// Only replay events at or after this RFC 3339 time.
        #[arg(long)]
        since: Option<String>,

        /// Print the events without running the subscribers.
        #[arg(long)]
        dry_run: bool,
    },

    /// Load use cases and flows from a catalog file.
    Seed {
        #[command(flatten)]
        common: Common,

        /// Catalog TOML file.
        #[arg(long)]
        file: PathBuf,
    },
}

impl Common {
    fn load(&self) -> anyhow::Result<FlowgateConfig> {
        let mut config = FlowgateConfig::load(self.config.as_deref())?;
        if let Some(dir) = &self.data_dir {
            config.storage.data_dir = dir.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { common, port } => {
            let mut config = common.load()?;
            if let Some(port) = port {
                config.server.port = port;
            }
            logging::init(&config.logging)?;
            app::serve(config).await
        }
        Command::Replay {
            common,
            topic,
            since,
            dry_run,
        } => {
            let config = common.load()?;
            logging::init(&config.logging)?;
            let options = ReplayOptions {
                topic,
                since: since.as_deref().map(replay::parse_since).transpose()?,
                dry_run,
            };
            let app = App::open(config)?;
            let count = replay::run(&app, &options, Printer::stdout()).await?;
            info!(count, "events replayed");
            Ok(())
        }
        Command::Seed { common, file } => {
            let config = common.load()?;
            logging::init(&config.logging)?;
            let catalog = seed::Catalog::from_file(&file)?;
            let app = App::open(config)?;
            let workers = app.attach()?;
            let report = seed::apply(&app, &catalog).await;
            app.close(workers).await;
            let report = report?;
            info!(use_cases = report.use_cases, flows = report.flows, "catalog loaded");
            Ok(())
        }
    }
}
