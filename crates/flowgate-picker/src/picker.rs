//! The pick operation.
//!
//! Lookups, flow selection and every write of a pick happen inside one
//! store transaction, so a failed or timed-out pick leaves no correlation,
//! audit row or event behind. The match event is published only after the
//! transaction committed; [`Picker::commit`] leaves that step to the caller
//! so a bounded request can stop its clock at the commit.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use flowgate_core::config::PickerConfig;
use flowgate_core::epoch_millis;
use flowgate_events::{Event, EventBus, EventHandle, EventPayload, EventType, PublishMode, topics};
use flowgate_state::{PickerCorrelation, PickerMatch, StateRead, StateStore};

use crate::error::{PickerError, PickerResult};
use crate::select::select_weighted;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PickRequest {
    pub correlation_id: String,
    pub use_case_code: String,
    pub use_case_step_code: String,
}

/// Outcome of a pick: the audit record plus the step configuration handed
/// back to the caller.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PickResult {
    #[serde(rename = "match")]
    pub picker_match: PickerMatch,
    pub output: serde_json::Value,
    pub placeholders: Vec<String>,
}

/// A pick whose transaction committed but whose match event is not yet
/// published.
#[must_use = "the match event is only delivered once the pick is published"]
#[derive(Debug)]
pub struct CommittedPick {
    result: PickResult,
    handles: Vec<EventHandle>,
}

impl CommittedPick {
    pub fn result(&self) -> &PickResult {
        &self.result
    }
}

pub struct Picker {
    store: StateStore,
    bus: EventBus,
    correlation_ttl: Duration,
    publish_mode: PublishMode,
    rng: Mutex<StdRng>,
}

impl Picker {
    pub fn new(store: StateStore, bus: EventBus, config: &PickerConfig) -> Self {
        Self {
            store,
            bus,
            correlation_ttl: config.correlation_ttl(),
            publish_mode: PublishMode::Detached,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Wait for downstream handlers when publishing match events.
    pub fn with_publish_mode(mut self, mode: PublishMode) -> Self {
        self.publish_mode = mode;
        self
    }

    /// Use a deterministic sampler.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    fn ttl_ms(&self) -> u64 {
        self.correlation_ttl.as_millis() as u64
    }

    /// Assign the request to a flow, reusing the flow of a live correlation,
    /// and publish the match event.
    pub async fn pick(&self, request: &PickRequest, deadline: Option<Instant>) -> PickerResult<PickResult> {
        let committed = self.commit(request, deadline)?;
        Ok(self.publish(committed).await)
    }

    /// Run the pick transaction without publishing.
    ///
    /// When `deadline` passes before the transaction commits, nothing is
    /// written and the pick fails with a timeout.
    pub fn commit(&self, request: &PickRequest, deadline: Option<Instant>) -> PickerResult<CommittedPick> {
        let correlation_id = Uuid::parse_str(&request.correlation_id)
            .map_err(|_| PickerError::InvalidCorrelationId(request.correlation_id.clone()))?
            .to_string();
        let now = epoch_millis();
        let ttl_ms = self.ttl_ms();

        let (result, handles) = self.store.write(deadline, |txn| {
            let use_case = txn
                .use_case_by_code(&request.use_case_code)?
                .ok_or_else(|| PickerError::UseCaseNotFound(request.use_case_code.clone()))?;
            if !use_case.active {
                return Err(PickerError::UseCaseNotActive(use_case.code.clone()));
            }
            let step = txn
                .use_case_step_by_code(&use_case.id, &request.use_case_step_code)?
                .ok_or_else(|| PickerError::UseCaseStepNotFound(request.use_case_step_code.clone()))?;

            let live = txn
                .correlation(&correlation_id)?
                .filter(|c| c.is_valid_at(now, ttl_ms));
            let (flow_id, is_first_correlation) = match live {
                Some(existing) if existing.use_case_id != use_case.id => {
                    return Err(PickerError::CorrelationConflict {
                        correlation_id: correlation_id.clone(),
                        use_case_id: existing.use_case_id,
                    });
                }
                Some(existing) => (existing.flow_id, false),
                None => {
                    let flows = txn.flows_for_use_case(&use_case.id)?;
                    if flows.is_empty() {
                        return Err(PickerError::FlowsNotAvailable(use_case.code.clone()));
                    }
                    let mut rng = self.rng.lock().expect("picker rng lock");
                    let selected = select_weighted(&flows, &mut *rng)
                        .ok_or_else(|| PickerError::FallbackFlowNotAvailable(use_case.code.clone()))?;
                    (selected.id.clone(), true)
                }
            };

            let flow_step = txn
                .flow_step(&flow_id, &step.id)?
                .ok_or_else(|| PickerError::UseCaseStepNotFound(request.use_case_step_code.clone()))?;

            if is_first_correlation {
                txn.put_correlation(&PickerCorrelation {
                    correlation_id: correlation_id.clone(),
                    use_case_id: use_case.id.clone(),
                    flow_id: flow_id.clone(),
                    created_at: now,
                })?;
            }

            let picker_match = PickerMatch {
                id: Uuid::new_v4().to_string(),
                use_case_id: use_case.id.clone(),
                use_case_step_id: step.id.clone(),
                flow_id: flow_id.clone(),
                flow_step_id: flow_step.id.clone(),
                correlation_id: correlation_id.clone(),
                is_first_correlation,
                request: serde_json::json!(request),
                response: serde_json::json!({
                    "flowId": flow_id,
                    "flowStepId": flow_step.id,
                    "output": flow_step.output,
                    "placeholders": flow_step.placeholders,
                }),
                created_at: now,
            };
            txn.put_picker_match(&picker_match)?;

            let event = Event::created(
                EventType::PickerMatchCreated,
                EventPayload::PickerMatch(picker_match.clone()),
            )?;
            let handle = self.bus.persist(txn, topics::PICKER_MATCH, event)?;

            let result = PickResult {
                picker_match,
                output: flow_step.output,
                placeholders: flow_step.placeholders,
            };
            Ok((result, vec![handle]))
        })?;

        debug!(
            use_case_id = %result.picker_match.use_case_id,
            flow_id = %result.picker_match.flow_id,
            correlation_id = %result.picker_match.correlation_id,
            first = result.picker_match.is_first_correlation,
            "request picked"
        );
        Ok(CommittedPick { result, handles })
    }

    /// Publish the match event of a committed pick. Failures are logged;
    /// the pick itself already stands.
    pub async fn publish(&self, committed: CommittedPick) -> PickResult {
        let CommittedPick { result, handles } = committed;
        if let Err(e) = self.bus.publish_with(handles, self.publish_mode).await {
            warn!(error = %e, "failed to publish picker match");
        }
        result
    }

    /// Delete correlations older than the time-to-live. Returns the count.
    pub fn purge_expired_correlations(&self) -> PickerResult<u32> {
        let now = epoch_millis();
        let purged = self
            .store
            .write(None, |txn| txn.purge_correlations(now, self.ttl_ms()))?;
        if purged > 0 {
            info!(purged, "expired correlations purged");
        }
        Ok(purged)
    }
}
