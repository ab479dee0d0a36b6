//! Catalog loading: writes use cases, steps, flows and flow steps from a
//! TOML file and announces them on the bus.
//!
//! ```toml
//! [[use_cases]]
//! id = "uc-greeting"
//! code = "greeting"
//! name = "Greeting"
//! active = true
//!
//! [[use_cases.steps]]
//! id = "uc-greeting-hello"
//! code = "hello"
//! name = "Hello"
//!
//! [[use_cases.flows]]
//! id = "control"
//! name = "Control"
//! fallback = true
//! current_serve_pct = 100.0
//!
//! [[use_cases.flows.steps]]
//! step = "hello"
//! output = { text = "Hi {{name}}" }
//! placeholders = ["{{name}}"]
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use flowgate_core::epoch_millis;
use flowgate_events::{Event, EventHandle, EventPayload, EventType, PublishMode, topics};
use flowgate_state::{Flow, FlowStep, StateRead, StoreTxn, UseCase, UseCaseStep};

use crate::app::App;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub use_cases: Vec<UseCaseEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UseCaseEntry {
    pub id: String,
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub steps: Vec<StepEntry>,
    #[serde(default)]
    pub flows: Vec<FlowEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepEntry {
    pub id: String,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowEntry {
    pub id: String,
    pub name: String,
    #[serde(default = "enabled")]
    pub active: bool,
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub current_serve_pct: f64,
    #[serde(default)]
    pub steps: Vec<FlowStepEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowStepEntry {
    /// Code of the use-case step this configures.
    pub step: String,
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default)]
    pub placeholders: Vec<String>,
}

fn enabled() -> bool {
    true
}

impl Catalog {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub use_cases: usize,
    pub flows: usize,
}

/// Write every use case of `catalog`, one transaction each, and wait until
/// the subscribers have handled the resulting events.
pub async fn apply(app: &App, catalog: &Catalog) -> anyhow::Result<SeedReport> {
    let mut report = SeedReport::default();
    for entry in &catalog.use_cases {
        let handles = app.store.write(None, |txn| write_use_case(app, txn, entry))?;
        app.bus.publish_with(handles, PublishMode::AwaitAck).await?;
        info!(use_case_id = %entry.id, flows = entry.flows.len(), "use case seeded");
        report.use_cases += 1;
        report.flows += entry.flows.len();
    }
    Ok(report)
}

fn write_use_case(app: &App, txn: &StoreTxn, entry: &UseCaseEntry) -> anyhow::Result<Vec<EventHandle>> {
    if entry.active && !entry.flows.iter().any(|f| f.fallback) {
        anyhow::bail!("use case {} is active but has no fallback flow", entry.id);
    }

    let now = epoch_millis();
    let existing = txn.use_case(&entry.id)?;
    let mut use_case = UseCase {
        id: entry.id.clone(),
        code: entry.code.clone(),
        name: entry.name.clone(),
        active: false,
        created_at: existing.as_ref().map_or(now, |u| u.created_at),
        updated_at: now,
    };
    // Flows are written against an inactive use case so fallback
    // reassignment is allowed; the requested state is restored below.
    txn.put_use_case(&use_case)?;

    let mut step_ids = HashMap::new();
    for step in &entry.steps {
        txn.put_use_case_step(&UseCaseStep {
            id: step.id.clone(),
            use_case_id: entry.id.clone(),
            code: step.code.clone(),
            name: step.name.clone(),
        })?;
        step_ids.insert(step.code.as_str(), step.id.as_str());
    }

    let mut flow_events = Vec::new();
    for flow_entry in entry.flows.iter().filter(|f| !f.fallback).chain(entry.flows.iter().filter(|f| f.fallback)) {
        let previous = txn.flow(&entry.id, &flow_entry.id)?;
        let flow = Flow {
            id: flow_entry.id.clone(),
            use_case_id: entry.id.clone(),
            name: flow_entry.name.clone(),
            active: flow_entry.active,
            fallback: flow_entry.fallback,
            current_serve_pct: flow_entry.current_serve_pct,
            created_at: previous.as_ref().map_or(now, |f| f.created_at),
            updated_at: now,
        };
        txn.put_flow(&flow)?;

        for step in &flow_entry.steps {
            let Some(step_id) = step_ids.get(step.step.as_str()) else {
                anyhow::bail!("flow {} configures unknown step {}", flow.id, step.step);
            };
            txn.put_flow_step(&FlowStep {
                id: format!("{}:{step_id}", flow.id),
                flow_id: flow.id.clone(),
                use_case_step_id: step_id.to_string(),
                output: step.output.clone(),
                placeholders: step.placeholders.clone(),
            })?;
        }

        let event = match previous {
            Some(before) => Event::updated(EventType::FlowUpdated, &EventPayload::Flow(before), EventPayload::Flow(flow))?,
            None => Event::created(EventType::FlowCreated, EventPayload::Flow(flow))?,
        };
        flow_events.push(event);
    }

    use_case.active = entry.active;
    txn.put_use_case(&use_case)?;
    let use_case_event = match existing {
        Some(before) => Event::updated(
            EventType::UseCaseUpdated,
            &EventPayload::UseCase(before),
            EventPayload::UseCase(use_case),
        )?,
        None => Event::created(EventType::UseCaseCreated, EventPayload::UseCase(use_case))?,
    };

    let mut handles = vec![app.bus.persist(txn, topics::USE_CASE, use_case_event)?];
    for event in flow_events {
        handles.push(app.bus.persist(txn, topics::FLOW, event)?);
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_core::FlowgateConfig;
    use flowgate_state::{RolloutState, StateStore};

    const CATALOG: &str = r#"
[[use_cases]]
id = "uc1"
code = "greeting"
name = "Greeting"
active = true

[[use_cases.steps]]
id = "uc1-hello"
code = "hello"
name = "Hello"

[[use_cases.flows]]
id = "control"
name = "Control"
fallback = true
current_serve_pct = 100.0

[[use_cases.flows.steps]]
step = "hello"
output = { text = "Hi {{name}}" }
placeholders = ["{{name}}"]

[[use_cases.flows]]
id = "candidate"
name = "Candidate"

[[use_cases.flows.steps]]
step = "hello"
output = { text = "Hello there, {{name}}" }
placeholders = ["{{name}}"]
"#;

    fn app() -> App {
        App::with_store(FlowgateConfig::default(), StateStore::open_in_memory().unwrap())
    }

    #[test]
    fn parses_nested_tables() {
        let catalog = Catalog::parse(CATALOG).unwrap();
        let uc = &catalog.use_cases[0];
        assert_eq!(uc.flows.len(), 2);
        assert!(uc.flows[1].active);
        assert_eq!(uc.flows[1].current_serve_pct, 0.0);
        assert_eq!(uc.flows[0].steps[0].output["text"], "Hi {{name}}");
    }

    #[tokio::test]
    async fn seeding_bootstraps_statistics_and_strategy() {
        let app = app();
        let workers = app.attach().unwrap();
        let report = apply(&app, &Catalog::parse(CATALOG).unwrap()).await.unwrap();
        assert_eq!(report, SeedReport { use_cases: 1, flows: 2 });

        let strategy = app.store.get_rollout_strategy("uc1").unwrap().unwrap();
        assert_eq!(strategy.rollout_state, RolloutState::Init);
        assert!(app.store.get_statistics("control").unwrap().is_some());
        assert!(app.store.get_statistics("candidate").unwrap().is_some());
        assert!(app.store.view().unwrap().flow_step("candidate", "uc1-hello").unwrap().is_some());
        app.close(workers).await;
    }

    #[tokio::test]
    async fn seeding_twice_updates_in_place() {
        let app = app();
        let catalog = Catalog::parse(CATALOG).unwrap();
        apply(&app, &catalog).await.unwrap();
        apply(&app, &catalog).await.unwrap();

        assert_eq!(app.store.list_flows("uc1").unwrap().len(), 2);
        let types: Vec<String> = app
            .store
            .list_events(Some("use_case"), None)
            .unwrap()
            .into_iter()
            .map(|r| r.event_type)
            .collect();
        assert_eq!(types, vec!["use_case.created", "use_case.updated"]);
    }

    #[tokio::test]
    async fn active_use_case_needs_a_fallback() {
        let app = app();
        let catalog = Catalog::parse(&CATALOG.replace("fallback = true", "fallback = false")).unwrap();
        let err = apply(&app, &catalog).await.unwrap_err();
        assert!(err.to_string().contains("no fallback flow"));
        assert!(app.store.list_flows("uc1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_step_code_aborts_the_use_case() {
        let app = app();
        let catalog = Catalog::parse(&CATALOG.replace("step = \"hello\"", "step = \"bye\"")).unwrap();
        assert!(apply(&app, &catalog).await.is_err());
        assert!(app.store.view().unwrap().use_case("uc1").unwrap().is_none());
    }
}
