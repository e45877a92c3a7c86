//! Per-dataset transformation history with undo, reset and replay.
//!
//! Entries are appended only after their fragment executed successfully, so a
//! failed apply leaves the history and current snapshot as they were.

use std::collections::BTreeMap;
use tracing::debug;

use crate::compile::{compile, display_header, CompileContext, Fragment};
use crate::engine::{execute, Engine, ExecutionInput, ExecutionLimits, ResultDescriptor};
use crate::error::{Result, WrangleError};
use crate::operation::Operation;
use crate::snapshot::{Snapshot, SnapshotId};

/// What the user applied: a structured operation or free-form code.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    Operation(Operation),
    Raw(String),
}

impl Applied {
    pub fn kind(&self) -> &str {
        match self {
            Self::Operation(op) => op.kind().as_str(),
            Self::Raw(_) => "raw",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub applied: Applied,
    pub fragment: Fragment,
    pub result: ResultDescriptor,
    pub predecessor: SnapshotId,
    /// Related datasets as they were when the entry ran.
    pub related: BTreeMap<String, Snapshot>,
}

impl HistoryEntry {
    pub fn snapshot(&self) -> &Snapshot {
        &self.result.snapshot
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryState {
    Origin,
    Step(usize),
}

#[derive(Debug, Clone)]
pub struct History {
    origin: Snapshot,
    entries: Vec<HistoryEntry>,
    /// 0 means unbounded.
    max_entries: usize,
}

impl History {
    pub fn new(origin: Snapshot, max_entries: usize) -> Self {
        Self {
            origin,
            entries: Vec::new(),
            max_entries,
        }
    }

    pub fn origin(&self) -> &Snapshot {
        &self.origin
    }

    pub fn current(&self) -> &Snapshot {
        self.entries
            .last()
            .map(HistoryEntry::snapshot)
            .unwrap_or(&self.origin)
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn state(&self) -> HistoryState {
        match self.entries.len() {
            0 => HistoryState::Origin,
            n => HistoryState::Step(n),
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.entries.is_empty()
    }

    pub fn can_reset(&self) -> bool {
        self.can_undo()
    }

    /// Compile and run `applied` against the current snapshot, recording it
    /// on success.
    pub fn apply(
        &mut self,
        applied: Applied,
        engine: Engine,
        related: Vec<Snapshot>,
        limits: &ExecutionLimits,
    ) -> Result<&HistoryEntry> {
        if self.max_entries > 0 && self.entries.len() >= self.max_entries {
            return Err(WrangleError::validation(
                "history",
                format!(
                    "history is limited to {} entries; save or reset the dataset first",
                    self.max_entries
                ),
            ));
        }
        let related: BTreeMap<String, Snapshot> = related
            .into_iter()
            .map(|s| (s.name().to_string(), s))
            .collect();
        let current = self.current().clone();
        let fragment = match &applied {
            Applied::Operation(op) => compile(op, engine, &context_for(&current, &related))?,
            Applied::Raw(text) => Fragment::raw(engine, text.as_str()),
        };
        let result = run(&fragment, &current, &related, limits)?;
        debug!(
            dataset = current.name(),
            kind = applied.kind(),
            rows = result.row_count,
            "history entry recorded"
        );
        self.entries.push(HistoryEntry {
            applied,
            fragment,
            result,
            predecessor: current.id(),
            related,
        });
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// The snapshot `undo` would make current.
    pub fn previous(&self) -> Option<&Snapshot> {
        match self.entries.len() {
            0 => None,
            1 => Some(&self.origin),
            n => Some(self.entries[n - 2].snapshot()),
        }
    }

    /// Drop the most recent entry.
    pub fn undo(&mut self) -> Result<HistoryEntry> {
        self.entries
            .pop()
            .ok_or_else(|| WrangleError::InvalidState("nothing to undo".to_string()))
    }

    /// Back to the origin snapshot. Returns how many entries were dropped.
    pub fn reset(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    /// Follow a dataset rename. Snapshot ids are kept.
    pub fn rename(&mut self, name: &str) {
        self.origin = self.origin.relabeled(name);
        for entry in &mut self.entries {
            entry.result.snapshot = entry.result.snapshot.relabeled(name);
        }
    }

    /// Re-run every entry from the origin. Operations are recompiled for
    /// `engine`; raw entries run their stored code on the engine they were
    /// written for.
    pub fn replay(&self, engine: Engine, limits: &ExecutionLimits) -> Result<Snapshot> {
        let mut current = self.origin.clone();
        for entry in &self.entries {
            let fragment = match &entry.applied {
                Applied::Operation(op) => {
                    compile(op, engine, &context_for(&current, &entry.related))?
                }
                Applied::Raw(_) => entry.fragment.clone(),
            };
            current = run(&fragment, &current, &entry.related, limits)?.snapshot;
        }
        Ok(current)
    }

    /// Display code for the whole history on `engine`, one fragment per entry.
    pub fn script(&self, engine: Engine) -> Result<String> {
        let mut out = display_header(engine).to_string();
        let mut input = &self.origin;
        for entry in &self.entries {
            let source = match &entry.applied {
                Applied::Operation(op) => {
                    compile(op, engine, &context_for(input, &entry.related))?.source_text
                }
                Applied::Raw(_) if entry.fragment.engine == engine => entry.fragment.source_text.clone(),
                Applied::Raw(_) => comment_out(entry.fragment.engine, &entry.fragment.source_text, engine),
            };
            out.push('\n');
            out.push_str(&source);
            if engine == Engine::Relational && !source.trim_end().ends_with(';') {
                out.push(';');
            }
            out.push('\n');
            input = entry.snapshot();
        }
        Ok(out)
    }
}

fn context_for(input: &Snapshot, related: &BTreeMap<String, Snapshot>) -> CompileContext {
    related.values().fold(
        CompileContext::new(input.name(), input.columns()),
        |ctx, s| ctx.with_related(s.name(), s.columns()),
    )
}

fn run(
    fragment: &Fragment,
    input: &Snapshot,
    related: &BTreeMap<String, Snapshot>,
    limits: &ExecutionLimits,
) -> Result<ResultDescriptor> {
    let exec = related
        .values()
        .cloned()
        .fold(ExecutionInput::new(input.clone()), ExecutionInput::with_related);
    execute(fragment, exec, limits)
}

/// Raw code written for another engine, kept visible as a comment.
fn comment_out(written_for: Engine, source: &str, engine: Engine) -> String {
    let marker = match engine {
        Engine::Relational => "--",
        Engine::Eager | Engine::Lazy => "//",
    };
    let mut out = format!("{} raw {} code:", marker, written_for);
    for line in source.lines() {
        out.push('\n');
        out.push_str(marker);
        out.push(' ');
        out.push_str(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use crate::engine::Engine;
    use polars::prelude::*;
    use serde_json::json;

    fn orders() -> Snapshot {
        let df = df!(
            "id" => [1i64, 2, 3],
            "amount" => [10i64, 20, 30],
            "region" => ["A", "B", "A"]
        )
        .unwrap();
        Snapshot::new("orders", df).unwrap()
    }

    fn op(kind: &str, params: serde_json::Value) -> Applied {
        Applied::Operation(registry::resolve(kind, &params, Engine::Eager).unwrap())
    }

    #[test]
    fn test_apply_undo_reset() {
        let limits = ExecutionLimits::default();
        let mut history = History::new(orders(), 0);
        assert_eq!(history.state(), HistoryState::Origin);
        assert!(history.undo().is_err());

        history
            .apply(
                op("filter", json!({"column": "region", "operator": "==", "value": "A"})),
                Engine::Eager,
                vec![],
                &limits,
            )
            .unwrap();
        history
            .apply(op("select_columns", json!({"columns": ["id"]})), Engine::Eager, vec![], &limits)
            .unwrap();
        assert_eq!(history.state(), HistoryState::Step(2));
        assert_eq!(history.current().column_names(), vec!["id"]);
        assert_eq!(history.entries()[1].predecessor, history.entries()[0].snapshot().id());

        let previous = history.previous().unwrap().id();
        history.undo().unwrap();
        assert_eq!(history.current().id(), previous);
        assert_eq!(history.current().row_count(), 2);
        assert_eq!(history.reset(), 1);
        assert_eq!(history.current().id(), history.origin().id());
        assert!(!history.can_reset());
        assert!(history.previous().is_none());
    }

    #[test]
    fn test_failed_apply_is_not_recorded() {
        let limits = ExecutionLimits::default();
        let mut history = History::new(orders(), 0);
        let err = history
            .apply(Applied::Raw("select nope + 1".to_string()), Engine::Lazy, vec![], &limits)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Execution);
        assert_eq!(history.state(), HistoryState::Origin);
    }

    #[test]
    fn test_cap_is_a_validation_error() {
        let limits = ExecutionLimits::default();
        let mut history = History::new(orders(), 1);
        let sort = || op("sort", json!({"columns": ["amount"]}));
        history.apply(sort(), Engine::Eager, vec![], &limits).unwrap();
        let err = history.apply(sort(), Engine::Eager, vec![], &limits).unwrap_err();
        assert_eq!(err.fields()[0].field, "history");
    }

    #[test]
    fn test_replay_reproduces_current() {
        let limits = ExecutionLimits::default();
        let mut history = History::new(orders(), 0);
        history
            .apply(
                op("create_column", json!({"name": "double", "expression": "amount * 2"})),
                Engine::Lazy,
                vec![],
                &limits,
            )
            .unwrap();
        history
            .apply(op("sort", json!({"columns": ["double"], "ascending": false})), Engine::Lazy, vec![], &limits)
            .unwrap();
        let replayed = history.replay(Engine::Lazy, &limits).unwrap();
        assert!(replayed.frame().equals_missing(history.current().frame()));
    }

    #[test]
    fn test_script_recompiles_for_engine() {
        let limits = ExecutionLimits::default();
        let mut history = History::new(orders(), 0);
        history
            .apply(
                op("filter", json!({"column": "amount", "operator": ">", "value": 15})),
                Engine::Eager,
                vec![],
                &limits,
            )
            .unwrap();
        let sql = history.script(Engine::Relational).unwrap();
        assert!(sql.starts_with(display_header(Engine::Relational)));
        assert!(sql.contains("SELECT * FROM \"orders\" WHERE (\"amount\" > 15);"));
        let lazy = history.script(Engine::Lazy).unwrap();
        assert!(lazy.contains(".lazy()"));
    }
}
