//! Session state: named datasets, their histories and the open chain.
//!
//! Every call names its dataset and engine explicitly. Actions on one dataset
//! are serialized with a per-dataset lock; a second action while one is
//! running gets [`WrangleError::Busy`] instead of waiting.

use polars::prelude::DataFrame;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, TryLockError};
use tracing::{info, info_span, warn};

use crate::chain::ChainState;
use crate::compile::Fragment;
use crate::config::AppConfig;
use crate::engine::{execute, preview_of, Engine, ExecutionInput, ExecutionLimits, ResultDescriptor};
use crate::error::{Result, WrangleError};
use crate::history::{Applied, History};
use crate::registry;
use crate::snapshot::{ColumnInfo, Snapshot, SnapshotDescription};
use crate::store::{MemoryStore, SnapshotStore};

/// What every mutating call hands back to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultView {
    pub dataset_name: String,
    pub columns: Vec<ColumnInfo>,
    pub preview_rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub display_code: String,
    pub can_undo: bool,
    pub can_reset: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composed_query: Option<String>,
}

impl ResultView {
    fn of(dataset: &str, result: &ResultDescriptor, display_code: String, history: Option<&History>) -> Self {
        Self {
            dataset_name: dataset.to_string(),
            columns: result.columns.clone(),
            preview_rows: result.preview_rows.clone(),
            row_count: result.row_count,
            display_code,
            can_undo: history.is_some_and(History::can_undo),
            can_reset: history.is_some_and(History::can_reset),
            composed_query: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    pub result: ResultView,
    /// Whether replaying reproduced the current snapshot exactly.
    pub matches_current: bool,
}

/// Tunables taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub limits: ExecutionLimits,
    pub default_engine: Engine,
    pub max_history: usize,
    /// 0 means no cap.
    pub full_load_max_rows: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SessionOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            limits: config.engine.limits(),
            default_engine: config.engine.default_engine,
            max_history: config.history.max_entries,
            full_load_max_rows: config.engine.full_load_max_rows,
        }
    }
}

type Slot = Arc<Mutex<History>>;

pub struct Session {
    store: Arc<dyn SnapshotStore>,
    datasets: RwLock<BTreeMap<String, Slot>>,
    chain: Mutex<Option<ChainState>>,
    options: SessionOptions,
}

fn check_name(field: &str, name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(WrangleError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn poisoned(what: &str) -> WrangleError {
    WrangleError::Internal(format!("{} lock poisoned", what))
}

fn stale_base(dataset: &str) -> WrangleError {
    WrangleError::InvalidState(format!(
        "'{}' changed since the chain was previewed; reset the chain",
        dataset
    ))
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), options)
    }

    /// Session backed by an external store. The store always holds each
    /// dataset's current snapshot.
    pub fn with_store(store: Arc<dyn SnapshotStore>, options: SessionOptions) -> Self {
        Self {
            store,
            datasets: RwLock::new(BTreeMap::new()),
            chain: Mutex::new(None),
            options,
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn default_engine(&self) -> Engine {
        self.options.default_engine
    }

    fn slot(&self, name: &str) -> Result<Slot> {
        let map = self.datasets.read().map_err(|_| poisoned("dataset map"))?;
        map.get(name)
            .cloned()
            .ok_or_else(|| WrangleError::NotFound(name.to_string()))
    }

    fn lock<'a>(name: &str, slot: &'a Slot) -> Result<MutexGuard<'a, History>> {
        match slot.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(WrangleError::Busy(name.to_string())),
            Err(TryLockError::Poisoned(_)) => Err(poisoned(name)),
        }
    }

    fn lock_chain(&self) -> Result<MutexGuard<'_, Option<ChainState>>> {
        match self.chain.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(WrangleError::Busy("chain".to_string())),
            Err(TryLockError::Poisoned(_)) => Err(poisoned("chain")),
        }
    }

    fn origin_view(&self, name: &str, history: &History, engine: Engine) -> Result<ResultView> {
        let result = ResultDescriptor::from_snapshot(history.current().clone(), self.options.limits.preview_rows);
        Ok(ResultView::of(name, &result, history.script(engine)?, Some(history)))
    }

    /// Register a new dataset at its origin.
    pub fn open(&self, name: &str, df: DataFrame) -> Result<ResultView> {
        check_name("name", name)?;
        let snapshot = Snapshot::new(name, df)
            .map_err(|e| WrangleError::Internal(format!("cannot load '{}': {}", name, e)))?;
        self.insert(name, snapshot)?;
        let slot = self.slot(name)?;
        let history = Self::lock(name, &slot)?;
        self.origin_view(name, &history, self.options.default_engine)
    }

    fn insert(&self, name: &str, snapshot: Snapshot) -> Result<()> {
        let mut map = self.datasets.write().map_err(|_| poisoned("dataset map"))?;
        if map.contains_key(name) {
            return Err(WrangleError::InvalidState(format!("Dataset '{}' already exists", name)));
        }
        self.store.store_snapshot(name, snapshot.clone())?;
        map.insert(
            name.to_string(),
            Arc::new(Mutex::new(History::new(snapshot, self.options.max_history))),
        );
        info!(dataset = name, "dataset opened");
        Ok(())
    }

    /// Current snapshots of the named datasets, for joins and SQL table
    /// names. `dataset` itself comes from its locked history.
    fn related(&self, dataset: &str, history: &History, names: &[String]) -> Result<Vec<Snapshot>> {
        names
            .iter()
            .map(|n| {
                if n == dataset {
                    Ok(history.current().clone())
                } else {
                    self.store.load_snapshot(n)
                }
            })
            .collect()
    }

    /// Mirror the newest entry into the store. The entry is dropped again
    /// when the store refuses it, so history and store never disagree.
    fn persist_last(&self, dataset: &str, history: &mut History) -> Result<()> {
        let snapshot = history.current().clone();
        if let Err(e) = self.store.store_snapshot(dataset, snapshot) {
            warn!(dataset, error = %e, "store rejected snapshot; entry rolled back");
            history.undo()?;
            return Err(e);
        }
        Ok(())
    }

    pub fn apply_operation(
        &self,
        dataset: &str,
        kind: &str,
        parameters: &Value,
        engine: Engine,
    ) -> Result<ResultView> {
        let _span = info_span!("apply_operation", dataset, engine = %engine, kind).entered();
        let op = registry::resolve(kind, parameters, engine)?;
        let slot = self.slot(dataset)?;
        let mut history = Self::lock(dataset, &slot)?;
        let related = self.related(dataset, &history, &op.related_datasets())?;
        let entry = history
            .apply(Applied::Operation(op), engine, related, &self.options.limits)
            .inspect_err(|e| warn!(error = %e, "operation not applied"))?;
        let (result, code) = (entry.result.clone(), entry.fragment.display_text.clone());
        self.persist_last(dataset, &mut history)?;
        Ok(ResultView::of(dataset, &result, code, Some(&*history)))
    }

    /// Run user-written code. Frame engines take a `select ... by ... where
    /// ...` query; the relational engine takes SQL, with every dataset in
    /// the session registered as a table.
    pub fn execute_raw_fragment(&self, dataset: &str, source: &str, engine: Engine) -> Result<ResultView> {
        let _span = info_span!("execute_raw_fragment", dataset, engine = %engine).entered();
        let slot = self.slot(dataset)?;
        let mut history = Self::lock(dataset, &slot)?;
        let related = match engine {
            Engine::Relational => {
                let others: Vec<String> = self
                    .list_datasets()
                    .into_iter()
                    .filter(|n| n != dataset)
                    .collect();
                self.related(dataset, &history, &others)?
            }
            Engine::Eager | Engine::Lazy => Vec::new(),
        };
        let entry = history
            .apply(Applied::Raw(source.to_string()), engine, related, &self.options.limits)
            .inspect_err(|e| warn!(error = %e, "raw code not applied"))?;
        let (result, code) = (entry.result.clone(), entry.fragment.display_text.clone());
        self.persist_last(dataset, &mut history)?;
        Ok(ResultView::of(dataset, &result, code, Some(&*history)))
    }

    pub fn undo(&self, dataset: &str, engine: Engine) -> Result<ResultView> {
        let _span = info_span!("undo", dataset, engine = %engine).entered();
        let slot = self.slot(dataset)?;
        let mut history = Self::lock(dataset, &slot)?;
        let previous = history
            .previous()
            .cloned()
            .ok_or_else(|| WrangleError::InvalidState("nothing to undo".to_string()))?;
        self.store.store_snapshot(dataset, previous)?;
        history.undo()?;
        self.origin_view(dataset, &history, engine)
    }

    pub fn reset(&self, dataset: &str, engine: Engine) -> Result<ResultView> {
        let _span = info_span!("reset", dataset, engine = %engine).entered();
        let slot = self.slot(dataset)?;
        let mut history = Self::lock(dataset, &slot)?;
        self.store.store_snapshot(dataset, history.origin().clone())?;
        let dropped = history.reset();
        info!(dropped, "history reset");
        self.origin_view(dataset, &history, engine)
    }

    /// Re-run the history from its origin and compare with the current
    /// snapshot.
    pub fn replay(&self, dataset: &str, engine: Engine) -> Result<ReplayReport> {
        let _span = info_span!("replay", dataset, engine = %engine).entered();
        let slot = self.slot(dataset)?;
        let history = Self::lock(dataset, &slot)?;
        let replayed = history.replay(engine, &self.options.limits)?;
        let matches_current = replayed.frame().equals_missing(history.current().frame());
        if !matches_current {
            warn!("replay diverged from the current snapshot");
        }
        let result = ResultDescriptor::from_snapshot(replayed, self.options.limits.preview_rows);
        Ok(ReplayReport {
            result: ResultView::of(dataset, &result, history.script(engine)?, Some(&*history)),
            matches_current,
        })
    }

    /// Copy the current snapshot into a new dataset with an empty history.
    pub fn save_as(&self, dataset: &str, new_name: &str) -> Result<ResultView> {
        check_name("new_name", new_name)?;
        let slot = self.slot(dataset)?;
        let snapshot = {
            let history = Self::lock(dataset, &slot)?;
            history.current().renamed(new_name)
        };
        self.insert(new_name, snapshot)?;
        let slot = self.slot(new_name)?;
        let history = Self::lock(new_name, &slot)?;
        self.origin_view(new_name, &history, self.options.default_engine)
    }

    /// Every row of the current snapshot, up to `full_load_max_rows`.
    pub fn load_full(&self, dataset: &str) -> Result<ResultView> {
        let slot = self.slot(dataset)?;
        let history = Self::lock(dataset, &slot)?;
        let snapshot = history.current();
        let cap = match self.options.full_load_max_rows {
            0 => snapshot.row_count(),
            n => n.min(snapshot.row_count()),
        };
        if cap < snapshot.row_count() {
            warn!(dataset, rows = snapshot.row_count(), cap, "full load truncated");
        }
        Ok(ResultView {
            dataset_name: dataset.to_string(),
            columns: snapshot.columns(),
            preview_rows: preview_of(snapshot.frame(), cap),
            row_count: snapshot.row_count(),
            display_code: String::new(),
            can_undo: history.can_undo(),
            can_reset: history.can_reset(),
            composed_query: None,
        })
    }

    pub fn describe(&self, dataset: &str) -> Result<SnapshotDescription> {
        self.store.describe_snapshot(dataset)
    }

    pub fn list_datasets(&self) -> Vec<String> {
        self.datasets
            .read()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn delete_dataset(&self, dataset: &str) -> Result<()> {
        let slot = self.slot(dataset)?;
        let _history = Self::lock(dataset, &slot)?;
        let mut map = self.datasets.write().map_err(|_| poisoned("dataset map"))?;
        map.remove(dataset);
        self.store.delete_snapshot(dataset)?;
        drop(map);
        if let Ok(mut chain) = self.chain.lock() {
            if chain.as_ref().is_some_and(|c| c.base() == dataset) {
                *chain = None;
            }
        }
        info!(dataset, "dataset deleted");
        Ok(())
    }

    pub fn rename_dataset(&self, dataset: &str, new_name: &str) -> Result<()> {
        check_name("new_name", new_name)?;
        let slot = self.slot(dataset)?;
        let mut history = Self::lock(dataset, &slot)?;
        if self.lock_chain()?.as_ref().is_some_and(|c| c.base() == dataset) {
            return Err(WrangleError::InvalidState(format!(
                "a chain is open on '{}'; commit or reset it before renaming",
                dataset
            )));
        }
        let mut map = self.datasets.write().map_err(|_| poisoned("dataset map"))?;
        if map.contains_key(new_name) {
            return Err(WrangleError::InvalidState(format!("Dataset '{}' already exists", new_name)));
        }
        self.store.rename_snapshot(dataset, new_name)?;
        history.rename(new_name);
        if let Some(slot) = map.remove(dataset) {
            map.insert(new_name.to_string(), slot);
        }
        info!(dataset, new_name, "dataset renamed");
        Ok(())
    }

    /// Preview one more chain step. `prior_composed_query` is the query the
    /// caller last saw; `None` starts a new chain on `base_dataset`.
    pub fn preview_chain_step(
        &self,
        operator: &str,
        parameters: &Value,
        prior_composed_query: Option<&str>,
        base_dataset: &str,
    ) -> Result<ResultView> {
        let _span = info_span!("preview_chain_step", dataset = base_dataset, operator).entered();
        let mut chain = self.lock_chain()?;
        let (mut state, continued) = match (prior_composed_query, chain.as_ref()) {
            (None, _) => (ChainState::new(base_dataset), false),
            (Some(q), _) if q.trim().is_empty() => (ChainState::new(base_dataset), false),
            (Some(q), Some(current)) if current.base() == base_dataset && current.matches(q) => {
                (current.clone(), true)
            }
            (Some(_), _) => {
                return Err(WrangleError::InvalidState(
                    "the chain has changed since this query was composed; reset the chain".to_string(),
                ))
            }
        };
        let slot = self.slot(base_dataset)?;
        let base = Self::lock(base_dataset, &slot)?.current().clone();
        if continued && !state.is_current(&base) {
            return Err(stale_base(base_dataset));
        }
        let preview = state
            .preview(operator, parameters, &base, &self.options.limits)
            .inspect_err(|e| warn!(error = %e, "chain step rejected"))?;
        let mut view = ResultView::of(base_dataset, &preview.result, String::new(), None);
        state.push(preview);
        let composed = state.composed_query();
        view.display_code = format!("{}\n{}", crate::compile::display_header(Engine::Relational), composed);
        view.composed_query = Some(composed);
        *chain = Some(state);
        Ok(view)
    }

    /// Discard the open chain, if any.
    pub fn reset_chain(&self) -> Result<()> {
        *self.lock_chain()? = None;
        Ok(())
    }

    /// Steps of the open chain, for display.
    pub fn chain(&self) -> Result<Option<ChainState>> {
        Ok(self.lock_chain()?.clone())
    }

    /// Materialize the open chain as a new dataset. `base_names` are the
    /// datasets the caller believes the query reads.
    pub fn commit_chain(&self, composed_query: &str, new_name: &str, base_names: &[String]) -> Result<ResultView> {
        let _span = info_span!("commit_chain", dataset = new_name).entered();
        check_name("new_name", new_name)?;
        let mut chain = self.lock_chain()?;
        let state = match chain.as_ref() {
            Some(state) if state.matches(composed_query) => state,
            _ => {
                return Err(WrangleError::InvalidState(
                    "there is no open chain with this query".to_string(),
                ))
            }
        };
        if !base_names.iter().any(|n| n == state.base()) {
            return Err(WrangleError::InvalidState(format!(
                "the chain reads '{}', which is not among the given base datasets",
                state.base()
            )));
        }
        if self.list_datasets().iter().any(|n| n == new_name) {
            return Err(WrangleError::InvalidState(format!("Dataset '{}' already exists", new_name)));
        }

        let fragment: Fragment = state.fragment()?;
        let base = {
            let slot = self.slot(state.base())?;
            let history = Self::lock(state.base(), &slot)?;
            history.current().clone()
        };
        if !state.is_current(&base) {
            return Err(stale_base(state.base()));
        }
        let mut input = ExecutionInput::new(base);
        for name in base_names.iter().filter(|n| n.as_str() != state.base()) {
            input = input.with_related(self.store.load_snapshot(name)?);
        }
        let result = execute(&fragment, input, &self.options.limits)?;
        self.insert(new_name, result.snapshot.renamed(new_name))?;
        *chain = None;
        info!(rows = result.row_count, "chain committed");

        let mut view = ResultView::of(new_name, &result, fragment.display_text.clone(), None);
        view.composed_query = Some(fragment.source_text);
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use polars::prelude::*;
    use serde_json::json;

    fn session() -> Session {
        let s = Session::new(SessionOptions::default());
        let df = df!(
            "id" => [1i64, 2, 3],
            "amount" => [10i64, 20, 30],
            "region" => ["A", "B", "A"]
        )
        .unwrap();
        s.open("orders", df).unwrap();
        s
    }

    #[test]
    fn test_busy_dataset() {
        let s = session();
        let slot = s.slot("orders").unwrap();
        let _held = slot.lock().unwrap();
        let err = s
            .apply_operation("orders", "sort", &json!({"columns": ["id"]}), Engine::Eager)
            .unwrap_err();
        assert!(matches!(err, WrangleError::Busy(ref n) if n == "orders"));
    }

    #[test]
    fn test_store_follows_current_snapshot() {
        let s = session();
        s.apply_operation(
            "orders",
            "filter",
            &json!({"column": "amount", "operator": ">", "value": 15}),
            Engine::Lazy,
        )
        .unwrap();
        assert_eq!(s.describe("orders").unwrap().row_count, 2);
        s.undo("orders", Engine::Lazy).unwrap();
        assert_eq!(s.describe("orders").unwrap().row_count, 3);
    }

    #[test]
    fn test_save_as_and_rename() {
        let s = session();
        s.apply_operation("orders", "select_columns", &json!({"columns": ["id"]}), Engine::Eager)
            .unwrap();
        let view = s.save_as("orders", "ids").unwrap();
        assert!(!view.can_undo);
        assert_eq!(view.columns.len(), 1);
        assert!(s.save_as("orders", "ids").is_err());

        s.rename_dataset("ids", "only_ids").unwrap();
        assert_eq!(s.list_datasets(), vec!["only_ids", "orders"]);
        let view = s
            .apply_operation("only_ids", "sort", &json!({"columns": ["id"], "ascending": false}), Engine::Relational)
            .unwrap();
        assert!(view.display_code.contains("FROM \"only_ids\""));
        s.delete_dataset("only_ids").unwrap();
        assert!(matches!(s.describe("only_ids"), Err(WrangleError::NotFound(_))));
    }

    #[test]
    fn test_load_full_is_capped() {
        let options = SessionOptions {
            full_load_max_rows: 2,
            ..SessionOptions::default()
        };
        let s = Session::new(options);
        s.open("t", df!("x" => [1i64, 2, 3]).unwrap()).unwrap();
        let view = s.load_full("t").unwrap();
        assert_eq!(view.preview_rows.len(), 2);
        assert_eq!(view.row_count, 3);
    }

    /// Accepts writes until `refuse` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        refuse: std::sync::atomic::AtomicBool,
    }

    impl SnapshotStore for FlakyStore {
        fn load_snapshot(&self, name: &str) -> Result<Snapshot> {
            self.inner.load_snapshot(name)
        }
        fn list_names(&self) -> Vec<String> {
            self.inner.list_names()
        }
        fn store_snapshot(&self, name: &str, snapshot: Snapshot) -> Result<()> {
            if self.refuse.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(WrangleError::Internal("disk full".to_string()));
            }
            self.inner.store_snapshot(name, snapshot)
        }
        fn delete_snapshot(&self, name: &str) -> Result<()> {
            self.inner.delete_snapshot(name)
        }
        fn rename_snapshot(&self, old: &str, new: &str) -> Result<()> {
            self.inner.rename_snapshot(old, new)
        }
    }

    #[test]
    fn test_refused_store_write_leaves_history_alone() {
        let store = Arc::new(FlakyStore::default());
        let s = Session::with_store(store.clone(), SessionOptions::default());
        s.open("t", df!("x" => [1i64, 2, 3]).unwrap()).unwrap();
        s.apply_operation("t", "filter", &json!({"column": "x", "operator": ">", "value": 1}), Engine::Eager)
            .unwrap();

        store.refuse.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = s
            .apply_operation("t", "filter", &json!({"column": "x", "operator": ">", "value": 2}), Engine::Eager)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Internal);
        assert!(s.undo("t", Engine::Eager).is_err());
        assert!(s.reset("t", Engine::Eager).is_err());

        let slot = s.slot("t").unwrap();
        let history = slot.lock().unwrap();
        assert_eq!(history.entries().len(), 1);
        assert_eq!(history.current().row_count(), 2);
        assert_eq!(s.describe("t").unwrap().row_count, 2);
    }

    #[test]
    fn test_rename_waits_for_open_chain() {
        let s = session();
        let view = s
            .preview_chain_step("select", &json!({"predicate": "amount > 15"}), None, "orders")
            .unwrap();
        let err = s.rename_dataset("orders", "sales").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
        assert_eq!(s.list_datasets(), vec!["orders"]);

        let committed = s
            .commit_chain(view.composed_query.as_deref().unwrap(), "big", &["orders".to_string()])
            .unwrap();
        assert_eq!(committed.row_count, 2);
        s.rename_dataset("orders", "sales").unwrap();
    }

    #[test]
    fn test_stale_chain_query_is_rejected() {
        let s = session();
        let view = s
            .preview_chain_step("select", &json!({"predicate": "amount > 15"}), None, "orders")
            .unwrap();
        let err = s
            .preview_chain_step("project", &json!({"attributes": ["id"]}), Some("SELECT 1"), "orders")
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidState);
        assert!(s
            .commit_chain(view.composed_query.as_deref().unwrap(), "big", &["other".to_string()])
            .is_err());
        s.reset_chain().unwrap();
        assert!(s.chain().unwrap().is_none());
    }
}
