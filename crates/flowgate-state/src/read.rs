//! Typed queries shared by read views and write transactions.

use redb::{ReadTransaction, ReadableTable};
use serde::de::DeserializeOwned;

use crate::error::StateResult;
use crate::tables::*;
use crate::types::*;

/// Read a single JSON value by key.
pub(crate) fn read_one<T, R>(table: &R, key: &str) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let value: T = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Collect `(key, value)` pairs with `key >= from` that start with `prefix`,
/// in key order.
pub(crate) fn read_entries<T, R>(table: &R, from: &str, prefix: &str) -> StateResult<Vec<(String, T)>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.range(from..).map_err(map_err!(Read))? {
        let (key, value) = entry.map_err(map_err!(Read))?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        let decoded: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
        results.push((key.to_string(), decoded));
    }
    Ok(results)
}

/// Typed read access to the store.
///
/// Implementors supply the two raw accessors; every domain query is
/// provided on top of them so the same code serves [`StateView`] and
/// [`crate::StoreTxn`].
pub trait StateRead {
    /// Fetch one JSON value from `table`.
    fn get_json<T: DeserializeOwned>(&self, table: JsonTable, key: &str) -> StateResult<Option<T>>;

    /// Scan `table` from key `from` while keys start with `prefix`.
    fn scan_json<T: DeserializeOwned>(
        &self,
        table: JsonTable,
        from: &str,
        prefix: &str,
    ) -> StateResult<Vec<(String, T)>>;

    // ── Use cases ──────────────────────────────────────────────────

    fn use_case(&self, use_case_id: &str) -> StateResult<Option<UseCase>> {
        self.get_json(USE_CASES, use_case_id)
    }

    fn use_case_by_code(&self, code: &str) -> StateResult<Option<UseCase>> {
        match self.get_json::<String>(USE_CASE_CODES, code)? {
            Some(use_case_id) => self.use_case(&use_case_id),
            None => Ok(None),
        }
    }

    fn use_case_step_by_code(&self, use_case_id: &str, code: &str) -> StateResult<Option<UseCaseStep>> {
        Ok(self
            .use_case_steps(use_case_id)?
            .into_iter()
            .find(|step| step.code == code))
    }

    fn use_case_steps(&self, use_case_id: &str) -> StateResult<Vec<UseCaseStep>> {
        let prefix = format!("{use_case_id}:");
        values(self.scan_json(USE_CASE_STEPS, &prefix, &prefix)?)
    }

    // ── Flows ──────────────────────────────────────────────────────

    fn flow(&self, use_case_id: &str, flow_id: &str) -> StateResult<Option<Flow>> {
        self.get_json(FLOWS, &flow_key(use_case_id, flow_id))
    }

    /// All flows of a use case (active or not), in storage order.
    fn flows_for_use_case(&self, use_case_id: &str) -> StateResult<Vec<Flow>> {
        let prefix = format!("{use_case_id}:");
        values(self.scan_json(FLOWS, &prefix, &prefix)?)
    }

    fn flow_step(&self, flow_id: &str, use_case_step_id: &str) -> StateResult<Option<FlowStep>> {
        self.get_json(FLOW_STEPS, &flow_step_key(flow_id, use_case_step_id))
    }

    // ── Statistics ─────────────────────────────────────────────────

    fn statistics(&self, flow_id: &str) -> StateResult<Option<FlowStatistics>> {
        self.get_json(FLOW_STATISTICS, flow_id)
    }

    /// Statistics of every flow of a use case that has them, in flow order.
    fn statistics_for_use_case(&self, use_case_id: &str) -> StateResult<Vec<FlowStatistics>> {
        let mut results = Vec::new();
        for flow in self.flows_for_use_case(use_case_id)? {
            if let Some(stats) = self.statistics(&flow.id)? {
                results.push(stats);
            }
        }
        Ok(results)
    }

    fn feedback_for_flow(&self, flow_id: &str) -> StateResult<Vec<FeedbackRecord>> {
        let prefix = format!("{flow_id}:");
        values(self.scan_json(FEEDBACK, &prefix, &prefix)?)
    }

    // ── Rollout ────────────────────────────────────────────────────

    fn rollout_strategy(&self, use_case_id: &str) -> StateResult<Option<RolloutStrategy>> {
        self.get_json(ROLLOUT_STRATEGIES, use_case_id)
    }

    fn rollout_strategies(&self) -> StateResult<Vec<RolloutStrategy>> {
        values(self.scan_json(ROLLOUT_STRATEGIES, "", "")?)
    }

    // ── Picker ─────────────────────────────────────────────────────

    fn correlation(&self, correlation_id: &str) -> StateResult<Option<PickerCorrelation>> {
        self.get_json(PICKER_CORRELATIONS, correlation_id)
    }

    fn correlations(&self) -> StateResult<Vec<PickerCorrelation>> {
        values(self.scan_json(PICKER_CORRELATIONS, "", "")?)
    }

    /// Audit records in creation order.
    fn picker_matches(&self) -> StateResult<Vec<PickerMatch>> {
        values(self.scan_json(PICKER_MATCHES, "", "")?)
    }

    // ── Events and locks ───────────────────────────────────────────

    /// Durable events in ascending event-time order, optionally filtered.
    fn events(&self, topic: Option<&str>, since: Option<u64>) -> StateResult<Vec<EventRecord>> {
        let from = since.map(|t| format!("{t:020}")).unwrap_or_default();
        let records: Vec<(String, EventRecord)> = self.scan_json(EVENTS, &from, "")?;
        Ok(records
            .into_iter()
            .map(|(_, record)| record)
            .filter(|record| topic.is_none_or(|t| record.topic == t))
            .collect())
    }

    fn job_lock(&self, job: &str) -> StateResult<Option<JobLock>> {
        self.get_json(JOB_LOCKS, job)
    }
}

fn values<T>(entries: Vec<(String, T)>) -> StateResult<Vec<T>> {
    Ok(entries.into_iter().map(|(_, value)| value).collect())
}

/// A consistent read-only snapshot of the store.
pub struct StateView {
    pub(crate) txn: ReadTransaction,
}

impl StateRead for StateView {
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
