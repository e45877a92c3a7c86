//! Execution engines and the shared execution harness.
//!
//! Adapters only turn a [`Fragment`] plus input snapshots into a `DataFrame`.
//! Timeouts, panics, preview extraction and error shaping live here so the
//! three engines report results and failures the same way.

mod eager;
mod frame;
mod lazy;
mod relational;

pub use eager::EagerAdapter;
pub use lazy::LazyAdapter;
pub use relational::RelationalAdapter;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::compile::Fragment;
use crate::error::{Result, WrangleError};
use crate::error_display::user_message_from_polars;
use crate::snapshot::{columns_of, ColumnInfo, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Eager,
    Lazy,
    Relational,
}

impl Engine {
    pub const ALL: [Engine; 3] = [Engine::Eager, Engine::Lazy, Engine::Relational];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eager => "eager",
            Self::Lazy => "lazy",
            Self::Relational => "relational",
        }
    }

    /// Eager and lazy both run frame-step programs.
    pub fn is_frame(self) -> bool {
        !matches!(self, Self::Relational)
    }

    pub fn adapter(self) -> &'static dyn EngineAdapter {
        static EAGER: EagerAdapter = EagerAdapter;
        static LAZY: LazyAdapter = LazyAdapter;
        static RELATIONAL: RelationalAdapter = RelationalAdapter;
        match self {
            Self::Eager => &EAGER,
            Self::Lazy => &LAZY,
            Self::Relational => &RELATIONAL,
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "eager" => Ok(Self::Eager),
            "lazy" => Ok(Self::Lazy),
            "relational" | "sql" => Ok(Self::Relational),
            other => Err(format!(
                "Unknown engine '{}'. Valid: eager, lazy, relational",
                other
            )),
        }
    }
}

/// Small set of engines, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineSet(u8);

impl EngineSet {
    pub const ALL: EngineSet = EngineSet(0b111);

    fn bit(engine: Engine) -> u8 {
        match engine {
            Engine::Eager => 0b001,
            Engine::Lazy => 0b010,
            Engine::Relational => 0b100,
        }
    }

    pub fn without(self, engine: Engine) -> Self {
        Self(self.0 & !Self::bit(engine))
    }

    pub fn contains(self, engine: Engine) -> bool {
        self.0 & Self::bit(engine) != 0
    }

    pub fn iter(self) -> impl Iterator<Item = Engine> {
        Engine::ALL.into_iter().filter(move |e| self.contains(*e))
    }
}

impl Serialize for EngineSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Per-call resource bounds.
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub preview_rows: usize,
    /// Use the polars streaming engine when collecting lazy plans.
    pub polars_streaming: bool,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            preview_rows: 50,
            polars_streaming: false,
        }
    }
}

/// Primary snapshot plus any datasets the fragment refers to by name.
#[derive(Debug, Clone)]
pub struct ExecutionInput {
    pub primary: Snapshot,
    pub related: BTreeMap<String, Snapshot>,
}

impl ExecutionInput {
    pub fn new(primary: Snapshot) -> Self {
        Self {
            primary,
            related: BTreeMap::new(),
        }
    }

    pub fn with_related(mut self, snapshot: Snapshot) -> Self {
        self.related.insert(snapshot.name().to_string(), snapshot);
        self
    }

    pub(crate) fn related_frame(&self, name: &str) -> PolarsResult<&DataFrame> {
        if name == self.primary.name() && !self.related.contains_key(name) {
            return Ok(self.primary.frame());
        }
        self.related
            .get(name)
            .map(Snapshot::frame)
            .ok_or_else(|| PolarsError::ComputeError(format!("dataset '{}' is not loaded", name).into()))
    }
}

/// Shape and bounded preview of an execution result.
#[derive(Debug, Clone)]
pub struct ResultDescriptor {
    pub columns: Vec<ColumnInfo>,
    pub preview_rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    /// The complete result, ready to become the dataset's next snapshot.
    pub snapshot: Snapshot,
}

impl ResultDescriptor {
    pub fn from_snapshot(snapshot: Snapshot, preview_rows: usize) -> Self {
        let df = snapshot.frame();
        Self {
            columns: columns_of(df),
            preview_rows: preview_of(df, preview_rows),
            row_count: df.height(),
            snapshot,
        }
    }
}

pub trait EngineAdapter: Send + Sync {
    fn engine(&self) -> Engine;

    /// Run a fragment to completion. Called on a worker thread.
    fn run(
        &self,
        fragment: &Fragment,
        input: &ExecutionInput,
        limits: &ExecutionLimits,
    ) -> PolarsResult<DataFrame>;
}

/// Execute a fragment on its engine's adapter under the configured timeout.
///
/// Polars work cannot be interrupted. A timed-out worker is abandoned but
/// keeps its thread and CPU until the plan finishes; its result is then
/// dropped and logged at debug level.
pub fn execute(
    fragment: &Fragment,
    input: ExecutionInput,
    limits: &ExecutionLimits,
) -> Result<ResultDescriptor> {
    let engine = fragment.engine;
    let (tx, rx) = mpsc::channel();
    let worker_fragment = fragment.clone();
    let worker_limits = limits.clone();
    let name = input.primary.name().to_string();
    debug!(engine = %engine, source = %fragment.source_text, "executing fragment");

    let spawned = std::thread::Builder::new()
        .name(format!("wrangle-{}", engine))
        .spawn(move || {
            let result = engine
                .adapter()
                .run(&worker_fragment, &input, &worker_limits)
                .and_then(|df| Snapshot::new(name, df));
            if tx.send(result).is_err() {
                debug!(engine = %engine, "caller gave up; discarding result of abandoned execution");
            }
        });
    if let Err(e) = spawned {
        return Err(WrangleError::Internal(format!(
            "failed to spawn execution worker: {}",
            e
        )));
    }

    match rx.recv_timeout(limits.timeout) {
        Ok(Ok(snapshot)) => Ok(ResultDescriptor::from_snapshot(snapshot, limits.preview_rows)),
        Ok(Err(e)) => {
            let message = user_message_from_polars(&e);
            warn!(engine = %engine, error = %message, "execution failed");
            Err(WrangleError::Execution {
                engine,
                message,
                fragment: fragment.source_text.clone(),
            })
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!(engine = %engine, limit_ms = limits.timeout.as_millis() as u64, "execution timed out");
            Err(WrangleError::Timeout {
                engine,
                limit: limits.timeout,
                fragment: fragment.source_text.clone(),
            })
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(WrangleError::Execution {
            engine,
            message: "the engine aborted while running this code".to_string(),
            fragment: fragment.source_text.clone(),
        }),
    }
}

/// Collect a lazy plan, optionally on the streaming engine.
pub(crate) fn collect_lazy(lf: LazyFrame, use_streaming: bool) -> PolarsResult<DataFrame> {
    #[cfg(feature = "streaming")]
    {
        if use_streaming {
            lf.with_new_streaming(true).collect()
        } else {
            lf.collect()
        }
    }
    #[cfg(not(feature = "streaming"))]
    {
        let _ = use_streaming;
        lf.collect()
    }
}

/// First `limit` rows as JSON cells, row-major.
pub fn preview_of(df: &DataFrame, limit: usize) -> Vec<Vec<serde_json::Value>> {
    let head = df.head(Some(limit));
    let columns = head.get_columns();
    (0..head.height())
        .map(|row| {
            columns
                .iter()
                .map(|c| {
                    c.get(row)
                        .map(|v| any_value_to_json(&v))
                        .unwrap_or(serde_json::Value::Null)
                })
                .collect()
        })
        .collect()
}

pub fn any_value_to_json(value: &AnyValue) -> serde_json::Value {
    use serde_json::Value;
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => Value::Bool(*b),
        AnyValue::Int8(v) => Value::from(*v),
        AnyValue::Int16(v) => Value::from(*v),
        AnyValue::Int32(v) => Value::from(*v),
        AnyValue::Int64(v) => Value::from(*v),
        AnyValue::UInt8(v) => Value::from(*v),
        AnyValue::UInt16(v) => Value::from(*v),
        AnyValue::UInt32(v) => Value::from(*v),
        AnyValue::UInt64(v) => Value::from(*v),
        AnyValue::Float32(v) => float_to_json(*v as f64),
        AnyValue::Float64(v) => float_to_json(*v),
        AnyValue::String(s) => Value::String(s.to_string()),
        AnyValue::StringOwned(s) => Value::String(s.to_string()),
        other => Value::String(other.to_string()),
    }
}

fn float_to_json(v: f64) -> serde_json::Value {
    serde_json::Number::from_f64(v)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_round_trips_through_str() {
        for engine in Engine::ALL {
            assert_eq!(engine.as_str().parse::<Engine>().unwrap(), engine);
        }
        assert_eq!("SQL".parse::<Engine>().unwrap(), Engine::Relational);
        assert!("pandas".parse::<Engine>().is_err());
    }

    #[test]
    fn test_engine_set() {
        let set = EngineSet::ALL.without(Engine::Relational);
        assert!(set.contains(Engine::Eager));
        assert!(!set.contains(Engine::Relational));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![Engine::Eager, Engine::Lazy]);
    }

    #[test]
    fn test_preview_is_capped_and_json() {
        let df = df!(
            "id" => [1i64, 2, 3],
            "name" => [Some("a"), None, Some("c")],
            "x" => [1.5f64, 2.5, 3.5]
        )
        .unwrap();
        let rows = preview_of(&df, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![serde_json::json!(1), serde_json::json!("a"), serde_json::json!(1.5)]);
        assert_eq!(rows[1][1], serde_json::Value::Null);
    }
}
