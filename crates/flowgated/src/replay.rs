//! Re-delivery of the durable event log.

use std::io::Write;
use std::sync::{Arc, Mutex};

use chrono::DateTime;
use tracing::info;

use flowgate_events::{Event, EventHandler, topics};

use crate::app::App;

#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    pub topic: Option<String>,
    /// Unix milliseconds; only events at or after this time are replayed.
    pub since: Option<u64>,
    /// Print only; do not wire the aggregator and controller.
    pub dry_run: bool,
}

/// Parse an RFC 3339 timestamp into Unix milliseconds.
pub fn parse_since(value: &str) -> anyhow::Result<u64> {
    let time = DateTime::parse_from_rfc3339(value)
        .map_err(|e| anyhow::anyhow!("invalid --since {value:?}: {e}"))?;
    u64::try_from(time.timestamp_millis()).map_err(|_| anyhow::anyhow!("--since {value:?} is before 1970"))
}

/// Writes each delivered event as one JSON line.
pub struct Printer {
    out: Mutex<Box<dyn Write + Send>>,
}

impl Printer {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl EventHandler for Printer {
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        let record = event.to_record(event.event_type.topic())?;
        let line = serde_json::to_string(&record)?;
        let mut out = self.out.lock().expect("printer lock");
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

/// Replay the log through `printer` and, unless `dry_run`, the regular
/// subscribers. Returns the number of events replayed.
pub async fn run(app: &App, options: &ReplayOptions, printer: Printer) -> anyhow::Result<usize> {
    if let Some(topic) = &options.topic
        && !topics::ALL.contains(&topic.as_str())
    {
        anyhow::bail!("unknown topic {topic:?}, expected one of {}", topics::ALL.join(", "));
    }

    let mut workers = if options.dry_run { Vec::new() } else { app.attach()? };
    let printer = Arc::new(printer);
    for topic in topics::ALL {
        if options.topic.as_deref().is_none_or(|t| t == topic) {
            workers.push(app.bus.subscribe(topic)?.spawn(Arc::clone(&printer)));
        }
    }

    let count = app.bus.replay(&app.store, options.topic.as_deref(), options.since).await;
    app.close(workers).await;
    let count = count?;
    info!(count, dry_run = options.dry_run, "replay finished");
    Ok(count)
}
