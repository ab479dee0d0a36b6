//! Write transaction scope.
//!
//! A [`StoreTxn`] is only handed out by [`crate::StateStore::write`]; every
//! mutation made through it commits or rolls back together, including the
//! durable events appended alongside the business change.

use redb::{ReadableTable, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::read::{StateRead, read_entries, read_one};
use crate::tables::*;
use crate::types::*;

pub struct StoreTxn {
    pub(crate) txn: WriteTransaction,
}

impl StateRead for StoreTxn {
    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        read_one(&table, key)
    }

    fn scan_json<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        from: &str,
        prefix: &str,
    ) -> StateResult<Vec<(String, T)>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        read_entries(&table, from, prefix)
    }
}

impl StoreTxn {
    fn put_json<T: Serialize>(&self, table: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let mut table = self.txn.open_table(table).map_err(map_err!(Table))?;
        table.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        Ok(())
    }

    fn remove(&self, table: JsonTable, key: &str) -> StateResult<bool> {
        let mut table = self.txn.open_table(table).map_err(map_err!(Table))?;
        let existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        Ok(existed)
    }

    fn keys_before(&self, table: JsonTable, end: &str) -> StateResult<Vec<String>> {
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        let mut keys = Vec::new();
        for entry in table.range(..end).map_err(map_err!(Read))? {
            let (key, _) = entry.map_err(map_err!(Read))?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    // ── Use cases ──────────────────────────────────────────────────

    /// Insert or update a use case and its code index entry. A code can
    /// belong to only one use case.
    pub fn put_use_case(&self, use_case: &UseCase) -> StateResult<()> {
        let owner: Option<String> = self.get_json(USE_CASE_CODES, &use_case.code)?;
        if owner.is_some_and(|id| id != use_case.id) {
            return Err(StateError::DuplicateUseCaseCode(use_case.code.clone()));
        }
        if let Some(previous) = self.use_case(&use_case.id)?
            && previous.code != use_case.code
        {
            self.remove(USE_CASE_CODES, &previous.code)?;
        }
        self.put_json(USE_CASE_CODES, &use_case.code, &use_case.id)?;
        self.put_json(USE_CASES, &use_case.table_key(), use_case)
    }

    pub fn put_use_case_step(&self, step: &UseCaseStep) -> StateResult<()> {
        self.put_json(USE_CASE_STEPS, &step.table_key(), step)
    }

    // ── Flows ──────────────────────────────────────────────────────

    /// Insert or update a flow, enforcing the fallback invariants.
    pub fn put_flow(&self, flow: &Flow) -> StateResult<()> {
        if flow.fallback {
            let siblings = self.flows_for_use_case(&flow.use_case_id)?;
            if siblings.iter().any(|f| f.fallback && f.id != flow.id) {
                return Err(StateError::DuplicateFallback(flow.use_case_id.clone()));
            }
        } else {
            let was_fallback = self
                .flow(&flow.use_case_id, &flow.id)?
                .is_some_and(|existing| existing.fallback);
            if was_fallback && self.use_case_is_active(&flow.use_case_id)? {
                return Err(StateError::FallbackRequired(flow.use_case_id.clone()));
            }
        }
        self.put_json(FLOWS, &flow.table_key(), flow)
    }

    /// Delete a flow. Returns true if it existed.
    pub fn delete_flow(&self, use_case_id: &str, flow_id: &str) -> StateResult<bool> {
        if let Some(flow) = self.flow(use_case_id, flow_id)? {
            if flow.fallback && self.use_case_is_active(use_case_id)? {
                return Err(StateError::FallbackInUse(flow_id.to_string()));
            }
        }
        self.remove(FLOWS, &flow_key(use_case_id, flow_id))
    }

    fn use_case_is_active(&self, use_case_id: &str) -> StateResult<bool> {
        Ok(self.use_case(use_case_id)?.is_some_and(|uc| uc.active))
    }

    pub fn put_flow_step(&self, step: &FlowStep) -> StateResult<()> {
        self.put_json(FLOW_STEPS, &step.table_key(), step)
    }

    // ── Statistics / feedback ──────────────────────────────────────

    pub fn put_statistics(&self, stats: &FlowStatistics) -> StateResult<()> {
        self.put_json(FLOW_STATISTICS, &stats.flow_id, stats)
    }

    pub fn put_feedback(&self, feedback: &FeedbackRecord) -> StateResult<()> {
        self.put_json(FEEDBACK, &feedback.table_key(), feedback)
    }

    // ── Rollout ────────────────────────────────────────────────────

    pub fn put_rollout_strategy(&self, strategy: &RolloutStrategy) -> StateResult<()> {
        self.put_json(ROLLOUT_STRATEGIES, &strategy.use_case_id, strategy)
    }

    // ── Picker ─────────────────────────────────────────────────────

    /// Insert or replace the correlation keyed by its ID.
    pub fn put_correlation(&self, correlation: &PickerCorrelation) -> StateResult<()> {
        self.put_json(PICKER_CORRELATIONS, &correlation.correlation_id, correlation)
    }

    pub fn put_picker_match(&self, picker_match: &PickerMatch) -> StateResult<()> {
        self.put_json(PICKER_MATCHES, &picker_match.table_key(), picker_match)
    }

    /// Delete correlations that are no longer valid at `now`. Returns the count.
    pub fn purge_correlations(&self, now: u64, ttl_ms: u64) -> StateResult<u32> {
        let all: Vec<(String, PickerCorrelation)> = self.scan_json(PICKER_CORRELATIONS, "", "")?;
        let mut count = 0;
        for (key, correlation) in all {
            if !correlation.is_valid_at(now, ttl_ms) {
                self.remove(PICKER_CORRELATIONS, &key)?;
                count += 1;
            }
        }
        Ok(count)
    }

    // ── Events ─────────────────────────────────────────────────────

    /// Append an event to the durable log. Returns its log key.
    pub fn append_event(&self, record: &EventRecord) -> StateResult<String> {
        let seq = {
            let mut meta = self.txn.open_table(META).map_err(map_err!(Table))?;
            let current = meta
                .get(EVENT_SEQ_KEY)
                .map_err(map_err!(Read))?
                .map(|guard| guard.value())
                .unwrap_or(0);
            meta.insert(EVENT_SEQ_KEY, current + 1).map_err(map_err!(Write))?;
            current + 1
        };
        let key = format!("{:020}:{:020}", record.event_time, seq);
        self.put_json(EVENTS, &key, record)?;
        debug!(%key, topic = %record.topic, event_type = %record.event_type, "event appended");
        Ok(key)
    }

    /// Delete every event with `event_time < cutoff`. Returns the count.
    pub fn delete_events_before(&self, cutoff: u64) -> StateResult<u32> {
        let keys = self.keys_before(EVENTS, &format!("{cutoff:020}"))?;
        for key in &keys {
            self.remove(EVENTS, key)?;
        }
        Ok(keys.len() as u32)
    }

    // ── Job locks ──────────────────────────────────────────────────

    /// Take the named lock for `owner` unless another owner holds an
    /// unexpired lease. Returns whether `owner` now holds it.
    pub fn try_acquire_job_lock(&self, job: &str, owner: &str, now: u64, lease_ms: u64) -> StateResult<bool> {
        if let Some(current) = self.job_lock(job)? {
            if current.owner != owner && current.expires_at > now {
                return Ok(false);
            }
        }
        let lock = JobLock {
            job: job.to_string(),
            owner: owner.to_string(),
            acquired_at: now,
            expires_at: now + lease_ms,
        };
        self.put_json(JOB_LOCKS, job, &lock)?;
        Ok(true)
    }

    /// Release the named lock if `owner` holds it. Returns true if released.
    pub fn release_job_lock(&self, job: &str, owner: &str) -> StateResult<bool> {
        match self.job_lock(job)? {
            Some(current) if current.owner == owner => self.remove(JOB_LOCKS, job),
            _ => Ok(false),
        }
    }
}
