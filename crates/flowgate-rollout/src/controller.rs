//! Rollout controller: reacts to statistics changes and manual commands.
//!
//! Every reaction reads the strategy and flows of one use case, mutates
//! them and appends the matching events inside a single store
//! transaction. The store admits one writer at a time, so concurrent
//! reactions on the same use case are serialized.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use flowgate_core::epoch_millis;
use flowgate_events::{
    Event, EventBus, EventHandle, EventHandler, EventPayload, EventResult, EventType, topics,
};
use flowgate_state::{
    EscapeRule, Flow, RolloutConfiguration, RolloutState, RolloutStrategy, StateRead, StateStore,
    StoreTxn, UseCase,
};

use crate::converge::converge;
use crate::error::{RolloutError, RolloutResult};
use crate::machine::{check_internal_transition, check_transition, internal_targets, is_editable};
use crate::strategy::{rollback_targets, validate, warmup_targets};

/// What a statistics reaction did.
#[derive(Debug, Clone, PartialEq)]
pub enum Reaction {
    /// The strategy's state or configuration does not call for a change.
    Skipped,
    /// Flow percentages moved; the state did not.
    Adjusted { flows: usize },
    /// Percentages moved and the strategy entered a new state.
    Transitioned { flows: usize, state: RolloutState },
}

#[derive(Clone)]
pub struct RolloutController {
    store: StateStore,
    bus: EventBus,
}

impl RolloutController {
    pub fn new(store: StateStore, bus: EventBus) -> Self {
        Self { store, bus }
    }

    pub fn strategy(&self, use_case_id: &str) -> RolloutResult<RolloutStrategy> {
        self.store
            .get_rollout_strategy(use_case_id)?
            .ok_or_else(|| RolloutError::StrategyNotFound(use_case_id.to_string()))
    }

    /// Create the `INIT` strategy of a new use case. Returns `false` when
    /// one already exists.
    pub async fn bootstrap(&self, use_case: &UseCase) -> RolloutResult<bool> {
        let handles = self.store.write(None, |txn| {
            if txn.rollout_strategy(&use_case.id)?.is_some() {
                return Ok::<_, RolloutError>(Vec::new());
            }
            let strategy = RolloutStrategy::new(&use_case.id, epoch_millis());
            txn.put_rollout_strategy(&strategy)?;
            let event = Event::created(
                EventType::RolloutStrategyCreated,
                EventPayload::RolloutStrategy(strategy),
            )?;
            Ok(vec![self.bus.persist(txn, topics::ROLLOUT_STRATEGY, event)?])
        })?;

        let created = !handles.is_empty();
        if created {
            info!(use_case_id = %use_case.id, "rollout strategy created");
        }
        self.publish(handles);
        Ok(created)
    }

    /// Replace the configuration of a strategy that has not been activated.
    pub async fn update_configuration(
        &self,
        use_case_id: &str,
        configuration: RolloutConfiguration,
        deadline: Option<Instant>,
    ) -> RolloutResult<RolloutStrategy> {
        let (strategy, handles) = self.store.write(deadline, |txn| {
            let current = load_strategy(txn, use_case_id)?;
            if !is_editable(current.rollout_state) {
                return Err(RolloutError::NotEditableWhileActive(current.rollout_state));
            }
            let flows = txn.flows_for_use_case(use_case_id)?;
            validate(&configuration, &flows).map_err(RolloutError::InvalidConfiguration)?;

            let mut updated = current.clone();
            updated.configuration = configuration.clone();
            let mut handles = Vec::new();
            self.save_strategy(txn, &current, &updated, &mut handles)?;
            Ok((updated, handles))
        })?;

        info!(%use_case_id, "rollout configuration updated");
        self.publish(handles);
        Ok(strategy)
    }

    /// Apply a manual state transition.
    ///
    /// Activating (`INIT → WARMUP`) keeps the current percentages and goes
    /// straight to `ADAPTIVE` when no warmup is configured. `FORCED_ESCAPED`
    /// applies the rollback of the first escape rule whose flow is active.
    pub async fn transition(
        &self,
        use_case_id: &str,
        target: RolloutState,
        deadline: Option<Instant>,
    ) -> RolloutResult<RolloutStrategy> {
        let (strategy, handles) = self.store.write(deadline, |txn| -> RolloutResult<_> {
            let current = load_strategy(txn, use_case_id)?;
            check_transition(current.rollout_state, target)?;

            let mut updated = current.clone();
            let mut handles = Vec::new();
            updated.rollout_state = match target {
                RolloutState::Warmup if current.configuration.warmup.is_none() => RolloutState::Adaptive,
                other => other,
            };

            if target == RolloutState::ForcedEscaped {
                let active = active_flows(txn, use_case_id)?;
                let rule = current
                    .configuration
                    .escape
                    .as_ref()
                    .and_then(|escape| {
                        escape
                            .rules
                            .iter()
                            .find(|rule| active.iter().any(|f| f.id == rule.flow_id))
                    })
                    .cloned();
                match rule {
                    Some(rule) => {
                        self.apply_rollback(txn, &rule, active, &mut handles)?;
                    }
                    None => debug!(%use_case_id, "forced escape without an applicable escape rule"),
                }
            }

            self.save_strategy(txn, &current, &updated, &mut handles)?;
            Ok((updated, handles))
        })?;

        info!(%use_case_id, requested = %target, state = %strategy.rollout_state, "rollout transitioned");
        self.publish(handles);
        Ok(strategy)
    }

    /// Traffic-based warmup step, run when a flow's session count moved.
    pub async fn on_session_count_changed(&self, use_case_id: &str) -> RolloutResult<Reaction> {
        let (reaction, handles) = self.store.write(None, |txn| -> RolloutResult<_> {
            let mut handles = Vec::new();
            let current = load_strategy(txn, use_case_id)?;
            let Some(warmup) = current.configuration.warmup.as_ref() else {
                return Ok((Reaction::Skipped, handles));
            };
            let Some(steps_total) = warmup.interval_session_reqs else {
                return Ok((Reaction::Skipped, handles));
            };
            if current.rollout_state != RolloutState::Warmup {
                return Ok((Reaction::Skipped, handles));
            }

            let active = active_flows(txn, use_case_id)?;
            let steps_done: u64 = txn
                .statistics_for_use_case(use_case_id)?
                .iter()
                .map(|s| s.tot_session_requests)
                .sum();
            let targets = warmup_targets(warmup, &active);

            let mut moved = 0;
            let mut all_at_target = true;
            for flow in active {
                let target = targets.get(&flow.id).copied().unwrap_or(0.0);
                let next = converge(flow.current_serve_pct, target, steps_done, steps_total);
                all_at_target &= next == target;
                if next != flow.current_serve_pct {
                    self.save_flow_pct(txn, flow, next, &mut handles)?;
                    moved += 1;
                }
            }

            if !all_at_target {
                return Ok((Reaction::Adjusted { flows: moved }, handles));
            }
            check_internal_transition(current.rollout_state, RolloutState::Adaptive)?;
            let mut updated = current.clone();
            updated.rollout_state = RolloutState::Adaptive;
            self.save_strategy(txn, &current, &updated, &mut handles)?;
            Ok((
                Reaction::Transitioned {
                    flows: moved,
                    state: RolloutState::Adaptive,
                },
                handles,
            ))
        })?;

        match &reaction {
            Reaction::Transitioned { state, .. } => {
                info!(%use_case_id, %state, "warmup goals reached");
            }
            Reaction::Adjusted { flows } => debug!(%use_case_id, flows, "warmup percentages converged one step"),
            Reaction::Skipped => {}
        }
        self.publish(handles);
        Ok(reaction)
    }

    /// Escape check, run when a flow's feedback count moved. The first
    /// active flow (in storage order) whose rule trips wins.
    pub async fn on_feedback_changed(&self, use_case_id: &str) -> RolloutResult<Reaction> {
        let (reaction, handles) = self.store.write(None, |txn| -> RolloutResult<_> {
            let mut handles = Vec::new();
            let current = load_strategy(txn, use_case_id)?;
            if !internal_targets(current.rollout_state).contains(&RolloutState::Escaped) {
                return Ok((Reaction::Skipped, handles));
            }
            let Some(escape) = current.configuration.escape.as_ref() else {
                return Ok((Reaction::Skipped, handles));
            };

            let active = active_flows(txn, use_case_id)?;
            let mut tripped = None;
            for flow in &active {
                let Some(rule) = escape.rules.iter().find(|r| r.flow_id == flow.id) else {
                    continue;
                };
                let Some(stats) = txn.statistics(&flow.id)? else {
                    continue;
                };
                if stats.tot_feedback >= rule.min_feedback && stats.avg_score <= rule.lower_score {
                    warn!(
                        %use_case_id,
                        flow_id = %flow.id,
                        tot_feedback = stats.tot_feedback,
                        avg_score = stats.avg_score,
                        lower_score = rule.lower_score,
                        "escape rule tripped"
                    );
                    tripped = Some(rule.clone());
                    break;
                }
            }
            let Some(rule) = tripped else {
                return Ok((Reaction::Skipped, handles));
            };

            let flows = self.apply_rollback(txn, &rule, active, &mut handles)?;
            let mut updated = current.clone();
            updated.rollout_state = RolloutState::Escaped;
            self.save_strategy(txn, &current, &updated, &mut handles)?;
            Ok((
                Reaction::Transitioned {
                    flows,
                    state: RolloutState::Escaped,
                },
                handles,
            ))
        })?;

        self.publish(handles);
        Ok(reaction)
    }

    /// Periodic hook for time-based warmup and the adaptive loop.
    ///
    /// Only reports the strategies that would be progressed; it changes
    /// nothing. Returns their count.
    pub fn tick(&self) -> RolloutResult<usize> {
        let strategies = self.store.view()?.rollout_strategies()?;
        let mut due = 0;
        for strategy in strategies {
            let time_based_warmup = strategy.rollout_state == RolloutState::Warmup
                && strategy
                    .configuration
                    .warmup
                    .as_ref()
                    .is_some_and(|w| w.interval_mins.is_some());
            if time_based_warmup || strategy.rollout_state == RolloutState::Adaptive {
                debug!(
                    use_case_id = %strategy.use_case_id,
                    state = %strategy.rollout_state,
                    "rollout tick: no periodic progression defined"
                );
                due += 1;
            }
        }
        Ok(due)
    }

    /// Set every active flow to its rollback percentage. Returns how many
    /// flows changed.
    fn apply_rollback(
        &self,
        txn: &StoreTxn,
        rule: &EscapeRule,
        active: Vec<Flow>,
        handles: &mut Vec<EventHandle>,
    ) -> RolloutResult<usize> {
        let targets = rollback_targets(rule, &active);
        let mut moved = 0;
        for flow in active {
            let target = targets.get(&flow.id).copied().unwrap_or(0.0);
            if flow.current_serve_pct != target {
                self.save_flow_pct(txn, flow, target, handles)?;
                moved += 1;
            }
        }
        info!(escape_flow = %rule.flow_id, moved, "escape rollback applied");
        Ok(moved)
    }

    fn save_flow_pct(
        &self,
        txn: &StoreTxn,
        flow: Flow,
        pct: f64,
        handles: &mut Vec<EventHandle>,
    ) -> RolloutResult<()> {
        let mut updated = flow.clone();
        updated.current_serve_pct = pct;
        updated.updated_at = epoch_millis();
        txn.put_flow(&updated)?;
        let event = Event::updated(
            EventType::FlowUpdated,
            &EventPayload::Flow(flow),
            EventPayload::Flow(updated),
        )?;
        handles.push(self.bus.persist(txn, topics::FLOW, event)?);
        Ok(())
    }

    fn save_strategy(
        &self,
        txn: &StoreTxn,
        before: &RolloutStrategy,
        after: &RolloutStrategy,
        handles: &mut Vec<EventHandle>,
    ) -> RolloutResult<()> {
        let mut after = after.clone();
        after.updated_at = epoch_millis();
        txn.put_rollout_strategy(&after)?;
        let event = Event::updated(
            EventType::RolloutStrategyUpdated,
            &EventPayload::RolloutStrategy(before.clone()),
            EventPayload::RolloutStrategy(after),
        )?;
        handles.push(self.bus.persist(txn, topics::ROLLOUT_STRATEGY, event)?);
        Ok(())
    }

    fn publish(&self, handles: Vec<EventHandle>) {
        if let Err(e) = self.bus.publish_all(handles) {
            warn!(error = %e, "failed to publish rollout events");
        }
    }

    /// Subscribe to statistics and use-case events and spawn one supervised
    /// loop per topic.
    pub fn attach(self: Arc<Self>) -> EventResult<Vec<JoinHandle<()>>> {
        let mut workers = Vec::new();
        for topic in [topics::FLOW_STATISTICS, topics::USE_CASE] {
            let subscription = self.bus.subscribe(topic)?;
            workers.push(subscription.spawn(Arc::clone(&self)));
        }
        info!("rollout controller attached");
        Ok(workers)
    }
}

impl EventHandler for RolloutController {
    async fn handle(&self, event: Event) -> anyhow::Result<()> {
        match (&event.event_type, &event.entity) {
            (EventType::FlowStatisticsUpdated, EventPayload::FlowStatistics(stats)) => {
                if event.has_change("tot_session_requests") {
                    self.on_session_count_changed(&stats.use_case_id).await?;
                }
                if event.has_change("tot_feedback") {
                    self.on_feedback_changed(&stats.use_case_id).await?;
                }
            }
            (EventType::UseCaseCreated, EventPayload::UseCase(use_case)) => {
                self.bootstrap(use_case).await?;
            }
            _ => {}
        }
        Ok(())
    }
}

fn load_strategy(txn: &StoreTxn, use_case_id: &str) -> RolloutResult<RolloutStrategy> {
    txn.rollout_strategy(use_case_id)?
        .ok_or_else(|| RolloutError::StrategyNotFound(use_case_id.to_string()))
}

fn active_flows(txn: &StoreTxn, use_case_id: &str) -> RolloutResult<Vec<Flow>> {
    Ok(txn
        .flows_for_use_case(use_case_id)?
        .into_iter()
        .filter(|f| f.active)
        .collect())
}
