//! StateStore: redb-backed state persistence for Flowgate.
//!
//! Provides transactional access to use cases, flows, statistics, rollout
//! strategies, picker correlations, the event log, and job locks. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use redb::{Database, ReadableDatabase};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::read::{StateRead, StateView};
use crate::tables::*;
use crate::txn::StoreTxn;
use crate::types::*;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        for table in [
            USE_CASES,
            USE_CASE_CODES,
            USE_CASE_STEPS,
            FLOWS,
            FLOW_STEPS,
            FLOW_STATISTICS,
            ROLLOUT_STRATEGIES,
            PICKER_CORRELATIONS,
            PICKER_MATCHES,
            FEEDBACK,
            EVENTS,
            JOB_LOCKS,
        ] {
            txn.open_table(table).map_err(map_err!(Table))?;
        }
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Open a consistent read-only snapshot.
    pub fn view(&self) -> StateResult<StateView> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        Ok(StateView { txn })
    }

    /// Run `f` inside one write transaction.
    ///
    /// The transaction commits only if `f` returns `Ok` and `deadline` (when
    /// given) has not passed; otherwise it is aborted and nothing `f` wrote
    /// survives.
    pub fn write<T, E, F>(&self, deadline: Option<Instant>, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTxn) -> Result<T, E>,
        E: From<StateError>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let scope = StoreTxn { txn };
        match f(&scope) {
            Ok(value) => {
                if deadline.is_some_and(|d| Instant::now() > d) {
                    scope.txn.abort().map_err(map_err!(Transaction))?;
                    warn!("write transaction aborted: deadline exceeded");
                    return Err(StateError::DeadlineExceeded.into());
                }
                scope.txn.commit().map_err(map_err!(Transaction))?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort_err) = scope.txn.abort() {
                    warn!(error = %abort_err, "failed to abort write transaction");
                }
                Err(e)
            }
        }
    }

    // ── Convenience wrappers (one transaction each) ────────────────

    pub fn put_use_case(&self, use_case: &UseCase) -> StateResult<()> {
        self.write(None, |txn| txn.put_use_case(use_case))
    }

    pub fn put_use_case_step(&self, step: &UseCaseStep) -> StateResult<()> {
        self.write(None, |txn| txn.put_use_case_step(step))
    }

    pub fn put_flow(&self, flow: &Flow) -> StateResult<()> {
        self.write(None, |txn| txn.put_flow(flow))
    }

    pub fn delete_flow(&self, use_case_id: &str, flow_id: &str) -> StateResult<bool> {
        self.write(None, |txn| txn.delete_flow(use_case_id, flow_id))
    }

    pub fn put_flow_step(&self, step: &FlowStep) -> StateResult<()> {
        self.write(None, |txn| txn.put_flow_step(step))
    }

    pub fn list_flows(&self, use_case_id: &str) -> StateResult<Vec<Flow>> {
        self.view()?.flows_for_use_case(use_case_id)
    }

    pub fn get_statistics(&self, flow_id: &str) -> StateResult<Option<FlowStatistics>> {
        self.view()?.statistics(flow_id)
    }

    pub fn get_rollout_strategy(&self, use_case_id: &str) -> StateResult<Option<RolloutStrategy>> {
        self.view()?.rollout_strategy(use_case_id)
    }

    pub fn get_correlation(&self, correlation_id: &str) -> StateResult<Option<PickerCorrelation>> {
        self.view()?.correlation(correlation_id)
    }

    pub fn list_events(&self, topic: Option<&str>, since: Option<u64>) -> StateResult<Vec<EventRecord>> {
        self.view()?.events(topic, since)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_use_case(id: &str, active: bool) -> UseCase {
        UseCase {
            id: id.to_string(),
            code: format!("{id}-code"),
            name: id.to_string(),
            active,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_flow(use_case_id: &str, id: &str, pct: f64, fallback: bool) -> Flow {
        Flow {
            id: id.to_string(),
            use_case_id: use_case_id.to_string(),
            name: id.to_string(),
            active: true,
            fallback,
            current_serve_pct: pct,
            created_at: 1000,
            updated_at: 1000,
        }
    }

    fn test_event(time: u64, topic: &str) -> EventRecord {
        EventRecord {
            event_id: format!("ev-{time}-{topic}"),
            event_time: time,
            topic: topic.to_string(),
            event_type: "flow.updated".to_string(),
            entity: serde_json::json!({"id": "f1"}),
            changes: vec!["current_serve_pct".to_string()],
        }
    }

    // ── Use cases and flows ────────────────────────────────────────

    #[test]
    fn use_case_lookup_by_code() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_use_case(&test_use_case("uc1", true)).unwrap();
        store.put_use_case(&test_use_case("uc2", false)).unwrap();

        let view = store.view().unwrap();
        assert_eq!(view.use_case_by_code("uc2-code").unwrap().unwrap().id, "uc2");
        assert!(view.use_case_by_code("missing").unwrap().is_none());
    }

    #[test]
    fn renamed_code_moves_the_index_entry() {
        let store = StateStore::open_in_memory().unwrap();
        let mut use_case = test_use_case("uc1", false);
        store.put_use_case(&use_case).unwrap();
        use_case.code = "renamed".into();
        store.put_use_case(&use_case).unwrap();

        let view = store.view().unwrap();
        assert!(view.use_case_by_code("uc1-code").unwrap().is_none());
        assert_eq!(view.use_case_by_code("renamed").unwrap().unwrap().id, "uc1");
    }

    #[test]
    fn code_belongs_to_one_use_case() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_use_case(&test_use_case("uc1", false)).unwrap();
        let mut clash = test_use_case("uc2", false);
        clash.code = "uc1-code".into();

        let err = store.put_use_case(&clash).unwrap_err();
        assert_eq!(err.code(), "duplicate-use-case-code");
        assert!(store.view().unwrap().use_case("uc2").unwrap().is_none());
        assert_eq!(store.view().unwrap().use_case_by_code("uc1-code").unwrap().unwrap().id, "uc1");
    }

    #[test]
    fn flows_are_scoped_to_their_use_case() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_flow(&test_flow("uc1", "a", 50.0, true)).unwrap();
        store.put_flow(&test_flow("uc1", "b", 50.0, false)).unwrap();
        store.put_flow(&test_flow("uc10", "c", 100.0, false)).unwrap();

        let flows = store.list_flows("uc1").unwrap();
        let ids: Vec<&str> = flows.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.list_flows("uc10").unwrap().len(), 1);
    }

    #[test]
    fn second_fallback_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_flow(&test_flow("uc1", "a", 50.0, true)).unwrap();
        let err = store.put_flow(&test_flow("uc1", "b", 50.0, true)).unwrap_err();
        assert!(matches!(err, StateError::DuplicateFallback(_)));
        assert_eq!(err.code(), "duplicate-fallback");
    }

    #[test]
    fn fallback_cannot_be_removed_while_use_case_active() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_use_case(&test_use_case("uc1", true)).unwrap();
        store.put_flow(&test_flow("uc1", "a", 100.0, true)).unwrap();

        let err = store.put_flow(&test_flow("uc1", "a", 100.0, false)).unwrap_err();
        assert!(matches!(err, StateError::FallbackRequired(_)));

        let err = store.delete_flow("uc1", "a").unwrap_err();
        assert!(matches!(err, StateError::FallbackInUse(_)));

        // Once the use case is inactive both operations go through.
        store.put_use_case(&test_use_case("uc1", false)).unwrap();
        store.put_flow(&test_flow("uc1", "a", 100.0, false)).unwrap();
        assert!(store.delete_flow("uc1", "a").unwrap());
        assert!(!store.delete_flow("uc1", "a").unwrap());
    }

    // ── Transactions ───────────────────────────────────────────────

    #[test]
    fn failed_closure_rolls_back_every_write() {
        let store = StateStore::open_in_memory().unwrap();
        let result: StateResult<()> = store.write(None, |txn| {
            txn.put_flow(&test_flow("uc1", "a", 100.0, false))?;
            txn.append_event(&test_event(10, "flow"))?;
            Err(StateError::NotFound("boom".into()))
        });
        assert!(result.is_err());
        assert!(store.list_flows("uc1").unwrap().is_empty());
        assert!(store.list_events(None, None).unwrap().is_empty());
    }

    #[test]
    fn expired_deadline_aborts_instead_of_committing() {
        let store = StateStore::open_in_memory().unwrap();
        let deadline = Instant::now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let result: StateResult<()> = store.write(Some(deadline), |txn| {
            txn.put_flow(&test_flow("uc1", "a", 100.0, false))
        });
        assert!(matches!(result, Err(StateError::DeadlineExceeded)));
        assert!(store.list_flows("uc1").unwrap().is_empty());
    }

    #[test]
    fn reads_inside_a_transaction_see_its_own_writes() {
        let store = StateStore::open_in_memory().unwrap();
        let seen = store
            .write(None, |txn| {
                txn.put_flow(&test_flow("uc1", "a", 100.0, false))?;
                txn.flows_for_use_case("uc1")
            })
            .unwrap();
        assert_eq!(seen.len(), 1);
    }

    // ── Event log ──────────────────────────────────────────────────

    #[test]
    fn events_are_ordered_by_time_and_filterable() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .write(None, |txn| -> StateResult<()> {
                txn.append_event(&test_event(300, "flow"))?;
                txn.append_event(&test_event(100, "picker_match"))?;
                txn.append_event(&test_event(200, "flow"))?;
                Ok(())
            })
            .unwrap();

        let times: Vec<u64> = store
            .list_events(None, None)
            .unwrap()
            .iter()
            .map(|e| e.event_time)
            .collect();
        assert_eq!(times, vec![100, 200, 300]);

        let flow_events = store.list_events(Some("flow"), None).unwrap();
        assert_eq!(flow_events.len(), 2);

        let recent = store.list_events(None, Some(200)).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event_time, 200);
    }

    #[test]
    fn same_millisecond_events_keep_append_order() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .write(None, |txn| -> StateResult<()> {
                for topic in ["a", "b", "c"] {
                    txn.append_event(&test_event(42, topic))?;
                }
                Ok(())
            })
            .unwrap();
        let topics: Vec<String> = store
            .list_events(None, None)
            .unwrap()
            .into_iter()
            .map(|e| e.topic)
            .collect();
        assert_eq!(topics, vec!["a", "b", "c"]);
    }

    #[test]
    fn retention_deletes_only_older_events() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .write(None, |txn| -> StateResult<()> {
                for t in [10, 20, 30] {
                    txn.append_event(&test_event(t, "flow"))?;
                }
                Ok(())
            })
            .unwrap();
        let deleted = store.write(None, |txn| txn.delete_events_before(30)).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.list_events(None, None).unwrap().len(), 1);
    }

    // ── Correlations ───────────────────────────────────────────────

    #[test]
    fn purge_removes_expired_correlations() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .write(None, |txn| -> StateResult<()> {
                for (id, created_at) in [("old", 0u64), ("fresh", 900)] {
                    txn.put_correlation(&PickerCorrelation {
                        correlation_id: id.to_string(),
                        use_case_id: "uc1".to_string(),
                        flow_id: "a".to_string(),
                        created_at,
                    })?;
                }
                Ok(())
            })
            .unwrap();

        let purged = store.write(None, |txn| txn.purge_correlations(1_000, 500)).unwrap();
        assert_eq!(purged, 1);
        assert!(store.get_correlation("old").unwrap().is_none());
        assert!(store.get_correlation("fresh").unwrap().is_some());
    }

    // ── Job locks ──────────────────────────────────────────────────

    #[test]
    fn job_lock_is_exclusive_until_released_or_expired() {
        let store = StateStore::open_in_memory().unwrap();
        let acquire = |owner: &str, now: u64| {
            store
                .write(None, |txn| txn.try_acquire_job_lock("cleanup", owner, now, 100))
                .unwrap()
        };

        assert!(acquire("a", 0));
        assert!(!acquire("b", 50));
        // Re-entrant for the same owner.
        assert!(acquire("a", 60));
        // Lease from t=60 expires at t=160.
        assert!(acquire("b", 160));

        assert!(!store.write(None, |txn| txn.release_job_lock("cleanup", "a")).unwrap());
        assert!(store.write(None, |txn| txn.release_job_lock("cleanup", "b")).unwrap());
        assert!(acquire("a", 170));
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_flow(&test_flow("uc1", "a", 100.0, false)).unwrap();
            store
                .write(None, |txn| txn.append_event(&test_event(1, "flow")))
                .unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.list_flows("uc1").unwrap().len(), 1);
        assert_eq!(store.list_events(None, None).unwrap().len(), 1);
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        let view = store.view().unwrap();
        assert!(view.flows_for_use_case("any").unwrap().is_empty());
        assert!(view.rollout_strategies().unwrap().is_empty());
        assert!(view.picker_matches().unwrap().is_empty());
        assert!(view.events(Some("flow"), None).unwrap().is_empty());
        assert!(view.job_lock("cleanup").unwrap().is_none());
    }
}
