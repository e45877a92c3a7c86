//! Incremental chains of unary relational operators.
//!
//! Each step reads the output of the step before it. The composed query is
//! rebuilt from the step list on every addition and only becomes a dataset
//! when the chain is committed.

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::compile::{compile, CompileContext, Fragment, Program, SqlSelect};
use crate::engine::{execute, Engine, ExecutionInput, ExecutionLimits, ResultDescriptor};
use crate::error::{Result, WrangleError};
use crate::operation::{Operation, OperationKind};
use crate::registry;
use crate::snapshot::{ColumnInfo, Snapshot, SnapshotId};

/// Operators that combine two relations; a chain only has one.
pub const BINARY_OPERATORS: &[&str] = &[
    "join",
    "natural_join",
    "union",
    "intersection",
    "difference",
    "product",
    "cartesian_product",
    "division",
];

/// Map a chain operator name to the operation kind it runs as.
pub fn operator_kind(operator: &str) -> Result<OperationKind> {
    let name = operator.trim().to_lowercase();
    match name.as_str() {
        "select" | "relational_select" => Ok(OperationKind::RelationalSelect),
        "project" | "relational_project" => Ok(OperationKind::RelationalProject),
        "rename" | "relational_rename" => Ok(OperationKind::RelationalRename),
        other if BINARY_OPERATORS.contains(&other) => Err(WrangleError::UnsupportedCombination {
            kind: other.to_string(),
            engine: Engine::Relational,
            reason: Some("not supported for chaining".to_string()),
        }),
        other => Err(WrangleError::validation(
            "operator",
            format!("unknown operator '{}'. Valid: select, project, rename", other),
        )),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainStep {
    pub operator: OperationKind,
    pub parameters: Value,
    /// Short relational-algebra rendering, e.g. `σ amount > 15`.
    pub display: String,
    /// Columns of this step's preview; the next step validates against them.
    pub columns: Vec<ColumnInfo>,
    #[serde(skip)]
    operation: Operation,
}

fn display_of(op: &Operation) -> String {
    match op {
        Operation::RelationalSelect(p) => format!("σ {}", p.predicate),
        Operation::RelationalProject(p) => format!("π {}", p.attributes.join(", ")),
        Operation::RelationalRename(p) => format!(
            "ρ {}",
            p.pairs()
                .iter()
                .map(|(o, n)| format!("{} → {}", o, n))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        other => other.kind().as_str().to_string(),
    }
}

/// A successful preview, not yet part of the chain.
#[derive(Debug, Clone)]
pub struct ChainPreview {
    pub step: ChainStep,
    /// Base snapshot the preview ran against.
    pub base_id: SnapshotId,
    pub composed: SqlSelect,
    pub result: ResultDescriptor,
}

impl ChainPreview {
    pub fn composed_query(&self) -> String {
        self.composed.render()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChainState {
    base: String,
    /// Base snapshot every step so far was previewed on.
    base_id: Option<SnapshotId>,
    steps: Vec<ChainStep>,
    composed: Option<SqlSelect>,
}

impl ChainState {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            base_id: None,
            steps: Vec::new(),
            composed: None,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn steps(&self) -> &[ChainStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Query text of the whole chain; empty before the first step.
    pub fn composed_query(&self) -> String {
        self.composed
            .as_ref()
            .map(SqlSelect::render)
            .unwrap_or_default()
    }

    /// Columns the next step validates against: the last preview's, or the
    /// base dataset's before the first step.
    pub fn columns(&self, base: &Snapshot) -> Vec<ColumnInfo> {
        self.steps
            .last()
            .map(|s| s.columns.clone())
            .unwrap_or_else(|| base.columns())
    }

    /// Whether `base` is still the snapshot the steps were previewed on.
    pub fn is_current(&self, base: &Snapshot) -> bool {
        self.base_id.is_none_or(|id| id == base.id())
    }

    /// Whether `query` is this chain's current composed query.
    pub fn matches(&self, query: &str) -> bool {
        !self.is_empty() && self.composed_query().trim() == query.trim()
    }

    /// Compile every step in order against the columns its predecessor saw.
    fn compose(&self, base: &Snapshot, next: &Operation) -> Result<SqlSelect> {
        let mut composed: Option<SqlSelect> = None;
        let mut columns = base.columns();
        let ops = self.steps.iter().map(|s| (&s.operation, Some(&s.columns)));
        for (op, preview_columns) in ops.chain(std::iter::once((next, None))) {
            let mut ctx = CompileContext::new(self.base.as_str(), columns.clone());
            if let Some(prev) = composed.take() {
                ctx = ctx.with_source(prev);
            }
            let fragment = compile(op, Engine::Relational, &ctx)?;
            let Program::Sql(select) = fragment.program else {
                return Err(WrangleError::internal("relational compile produced a non-SQL program"));
            };
            composed = Some(select);
            if let Some(cols) = preview_columns {
                columns = cols.clone();
            }
        }
        composed.ok_or_else(|| WrangleError::internal("empty chain composition"))
    }

    /// Validate and run one more step on the relational engine. The state is
    /// not touched; call [`ChainState::push`] with the preview to keep it.
    pub fn preview(
        &self,
        operator: &str,
        parameters: &Value,
        base: &Snapshot,
        limits: &ExecutionLimits,
    ) -> Result<ChainPreview> {
        let kind = operator_kind(operator)?;
        let operation = registry::resolve(kind.as_str(), parameters, Engine::Relational)?;
        let composed = self.compose(base, &operation)?;
        let fragment = Fragment::sql(composed.clone());
        debug!(base = %self.base, step = self.steps.len() + 1, query = %fragment.source_text, "chain preview");
        let result = execute(&fragment, ExecutionInput::new(base.clone()), limits)?;
        let step = ChainStep {
            operator: kind,
            parameters: parameters.clone(),
            display: display_of(&operation),
            columns: result.columns.clone(),
            operation,
        };
        Ok(ChainPreview {
            step,
            base_id: base.id(),
            composed,
            result,
        })
    }

    pub fn push(&mut self, preview: ChainPreview) {
        self.base_id = Some(preview.base_id);
        self.steps.push(preview.step);
        self.composed = Some(preview.composed);
    }

    /// Fragment that materializes the chain.
    pub fn fragment(&self) -> Result<Fragment> {
        self.composed
            .clone()
            .map(Fragment::sql)
            .ok_or_else(|| WrangleError::InvalidState("the chain has no steps".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
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

    #[test]
    fn test_binary_operators_are_rejected() {
        for op in BINARY_OPERATORS {
            let err = operator_kind(op).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UnsupportedCombination);
            assert!(err.to_string().contains("not supported for chaining"));
        }
        assert_eq!(operator_kind("Project").unwrap(), OperationKind::RelationalProject);
        assert_eq!(operator_kind("teleport").unwrap_err().kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_display_of_steps() {
        let limits = ExecutionLimits::default();
        let base = orders();
        let mut chain = ChainState::new("orders");
        let p = chain
            .preview("rename", &json!({"renames": [{"old": "amount", "new": "total"}]}), &base, &limits)
            .unwrap();
        assert_eq!(p.step.display, "ρ amount → total");
        chain.push(p);
        let p = chain.preview("select", &json!({"predicate": "total > 15"}), &base, &limits).unwrap();
        assert_eq!(p.step.display, "σ total > 15");
        assert_eq!(p.result.row_count, 2);
    }

    #[test]
    fn test_compose_is_rebuilt_from_steps() {
        let limits = ExecutionLimits::default();
        let base = orders();
        let mut chain = ChainState::new("orders");
        let p = chain.preview("select", &json!({"predicate": "amount > 15"}), &base, &limits).unwrap();
        chain.push(p);
        let p = chain.preview("project", &json!({"attributes": ["id"]}), &base, &limits).unwrap();
        assert_eq!(
            p.composed_query(),
            "SELECT \"id\" FROM (SELECT * FROM \"orders\" WHERE (\"amount\" > 15)) AS \"q1\""
        );
        chain.push(p);
        assert!(chain.matches(&chain.composed_query()));
        assert_eq!(chain.fragment().unwrap().source_text, chain.composed_query());
    }

    #[test]
    fn test_chain_remembers_its_base_snapshot() {
        let limits = ExecutionLimits::default();
        let base = orders();
        let mut chain = ChainState::new("orders");
        assert!(chain.is_current(&base));
        let p = chain.preview("select", &json!({"predicate": "amount > 15"}), &base, &limits).unwrap();
        chain.push(p);
        assert!(chain.is_current(&base));
        assert!(!chain.is_current(&base.renamed("orders")));
    }
}
