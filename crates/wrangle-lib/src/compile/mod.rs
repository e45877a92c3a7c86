//! Operation compiler.
//!
//! Every operation is first lowered to one engine-neutral [`FrameStep`],
//! checked against the column context. Frame engines run the step as is;
//! the relational engine translates it to a select tree, refusing steps
//! whose SQL form would not mean the same thing.

mod frame;
mod sql;

pub use frame::{FrameStep, JoinOutput, JoinPlan, SampleSize, WindowPlan, ROW_INDEX};
pub use sql::{with_columns, SqlExpr, SqlItem, SqlJoin, SqlSelect, SqlSource};

use std::collections::{BTreeMap, HashSet};

use crate::engine::Engine;
use crate::error::{FieldError, Result, WrangleError};
use crate::expr::{Function, Literal, ScalarExpr};
use crate::operation::*;
use crate::query::{parse_expression, NamedExpr};
use crate::registry;
use crate::snapshot::{ColumnInfo, SemanticType};

/// The structured form an adapter executes.
#[derive(Debug, Clone, PartialEq)]
pub enum Program {
    Frame(Vec<FrameStep>),
    Sql(SqlSelect),
    /// User-authored source, interpreted by the adapter when it runs.
    Raw(String),
}

/// Compiled, executable unit for one engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub engine: Engine,
    pub program: Program,
    /// Code the program corresponds to.
    pub source_text: String,
    /// `source_text` with the import or context lines a reader needs.
    pub display_text: String,
}

/// Context lines shown above generated code.
pub fn display_header(engine: Engine) -> &'static str {
    match engine {
        Engine::Eager | Engine::Lazy => "use polars::prelude::*;\n",
        Engine::Relational => "-- polars-sql; datasets are registered as tables by name\n",
    }
}

impl Fragment {
    fn new(engine: Engine, program: Program, source_text: String) -> Self {
        let display_text = format!("{}\n{}", display_header(engine), source_text);
        Self {
            engine,
            program,
            source_text,
            display_text,
        }
    }

    pub fn frame(engine: Engine, steps: Vec<FrameStep>) -> Self {
        let source = frame::render(engine, &steps);
        Self::new(engine, Program::Frame(steps), source)
    }

    pub fn sql(select: SqlSelect) -> Self {
        let source = select.render();
        Self::new(Engine::Relational, Program::Sql(select), source)
    }

    /// A fragment carrying the user's text verbatim.
    pub fn raw(engine: Engine, source: impl Into<String>) -> Self {
        let source = source.into();
        Self::new(engine, Program::Raw(source.clone()), source)
    }
}

/// Input columns, related datasets and, for composed queries, the select
/// the next step reads from.
#[derive(Debug, Clone, Default)]
pub struct CompileContext {
    pub dataset: String,
    pub columns: Vec<ColumnInfo>,
    pub related: BTreeMap<String, Vec<ColumnInfo>>,
    pub source: Option<SqlSelect>,
}

impl CompileContext {
    pub fn new(dataset: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        Self {
            dataset: dataset.into(),
            columns,
            ..Default::default()
        }
    }

    pub fn with_related(mut self, name: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        self.related.insert(name.into(), columns);
        self
    }

    pub fn with_source(mut self, source: SqlSelect) -> Self {
        self.source = Some(source);
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn column_type(&self, name: &str) -> Option<SemanticType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.semantic_type)
    }

    fn require(&self, field: &str, name: &str) -> Result<SemanticType> {
        self.column_type(name).ok_or_else(|| {
            WrangleError::validation(field, format!("column '{}' does not exist", name))
        })
    }

    fn require_all(&self, field: &str, names: &[String]) -> Result<()> {
        let missing: Vec<FieldError> = names
            .iter()
            .filter(|n| self.column_type(n).is_none())
            .map(|n| FieldError::new(field, format!("column '{}' does not exist", n)))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(WrangleError::Validation(missing))
        }
    }

    /// The relation a relational step reads from.
    fn sql_source(&self) -> SqlSource {
        match &self.source {
            Some(prev) => SqlSource::Subquery {
                alias: format!("q{}", nesting_depth(prev)),
                query: Box::new(prev.clone()),
            },
            None => SqlSource::table(self.dataset.as_str()),
        }
    }
}

fn nesting_depth(select: &SqlSelect) -> usize {
    match &select.from {
        SqlSource::Subquery { query, .. } => 1 + nesting_depth(query),
        SqlSource::Table { .. } => 1,
    }
}

/// Compile an operation for an engine.
pub fn compile(op: &Operation, engine: Engine, ctx: &CompileContext) -> Result<Fragment> {
    registry::check_engine(op.kind(), engine)?;
    let step = lower(op, engine, ctx)?;
    match engine {
        Engine::Eager | Engine::Lazy => Ok(Fragment::frame(engine, vec![step])),
        Engine::Relational => {
            let select = sql::translate(&step, ctx.sql_source(), &ctx.names())
                .map_err(|reason| WrangleError::compile(op.kind().as_str(), engine, reason))?;
            Ok(Fragment::sql(select))
        }
    }
}

fn unique_names(field: &str, names: &[String]) -> Result<()> {
    let mut seen = HashSet::new();
    for n in names {
        if !seen.insert(n.as_str()) {
            return Err(WrangleError::validation(
                field,
                format!("column '{}' is listed more than once", n),
            ));
        }
    }
    Ok(())
}

fn parse_checked(field: &str, text: &str, ctx: &CompileContext) -> Result<ScalarExpr> {
    let expr = parse_expression(text).map_err(|e| WrangleError::validation(field, e))?;
    ctx.require_all(field, &expr.referenced_columns())?;
    Ok(expr)
}

fn call(func: Function, args: Vec<ScalarExpr>) -> Result<ScalarExpr> {
    ScalarExpr::call(func, args).map_err(WrangleError::internal)
}

fn literal_of(field: &str, value: &serde_json::Value) -> Result<Literal> {
    Literal::from_json(value).ok_or_else(|| WrangleError::validation(field, "expected a scalar value"))
}

fn lower(op: &Operation, engine: Engine, ctx: &CompileContext) -> Result<FrameStep> {
    match op {
        Operation::Filter(p) => lower_filter(p, ctx).map(FrameStep::Filter),
        Operation::SelectColumns(p) => {
            ctx.require_all("columns", &p.columns)?;
            unique_names("columns", &p.columns)?;
            Ok(FrameStep::SelectColumns(p.columns.clone()))
        }
        Operation::DropColumns(p) => {
            ctx.require_all("columns", &p.columns)?;
            let keep: Vec<String> = ctx
                .names()
                .into_iter()
                .filter(|c| !p.columns.contains(c))
                .collect();
            if keep.is_empty() {
                return Err(WrangleError::validation("columns", "cannot drop every column"));
            }
            Ok(FrameStep::DropColumns {
                drop: p.columns.clone(),
                keep,
            })
        }
        Operation::Sort(p) => {
            ctx.require_all("columns", &p.columns)?;
            Ok(FrameStep::Sort {
                by: p.columns.clone(),
                descending: p.ascending.descending(p.columns.len()),
            })
        }
        Operation::Rename(p) => {
            let pairs: Vec<(String, String)> =
                p.mapping.iter().map(|(o, n)| (o.clone(), n.clone())).collect();
            lower_rename("mapping", &pairs, ctx)
        }
        Operation::RelationalRename(p) => {
            let field = if p.mapping.is_some() { "mapping" } else { "renames" };
            lower_rename(field, &p.pairs(), ctx)
        }
        Operation::DropDuplicates(p) => {
            let subset = match &p.subset {
                Some(s) => {
                    ctx.require_all("subset", s)?;
                    s.clone()
                }
                None => ctx.names(),
            };
            Ok(FrameStep::Distinct {
                subset,
                keep: p.keep,
                columns: ctx.names(),
            })
        }
        Operation::Fillna(p) => lower_fillna(p, ctx),
        Operation::Dropna(p) => {
            let subset = match &p.subset {
                Some(s) => {
                    ctx.require_all("subset", s)?;
                    s.clone()
                }
                None => ctx.names(),
            };
            Ok(FrameStep::DropNulls { subset, how: p.how })
        }
        Operation::Astype(p) => {
            ctx.require("column", &p.column)?;
            Ok(FrameStep::WithColumns(vec![NamedExpr {
                name: p.column.clone(),
                expr: ScalarExpr::column(p.column.as_str()).cast(p.dtype),
            }]))
        }
        Operation::GroupAggregate(p) => lower_group(p, ctx),
        Operation::Pivot(p) => {
            ctx.require_all("index", &p.index)?;
            ctx.require("columns", &p.columns)?;
            ctx.require("values", &p.values)?;
            if p.index.contains(&p.columns) || p.index.contains(&p.values) {
                return Err(WrangleError::validation(
                    "index",
                    "index cannot include the pivoted or value column",
                ));
            }
            Ok(FrameStep::Pivot {
                index: p.index.clone(),
                on: p.columns.clone(),
                values: p.values.clone(),
                agg: p.aggfunc,
            })
        }
        Operation::Melt(p) => lower_melt(p, ctx),
        Operation::Merge(p) => lower_merge(p, engine, ctx).map(FrameStep::Join),
        Operation::Sample(p) => {
            let size = match (p.n, p.frac) {
                (Some(n), _) => SampleSize::Rows(n),
                (None, Some(f)) => SampleSize::Fraction(f),
                (None, None) => {
                    return Err(WrangleError::internal("sample without n or frac passed validation"))
                }
            };
            Ok(FrameStep::Sample {
                size,
                replace: p.replace,
                seed: p.seed.unwrap_or(DEFAULT_SEED),
            })
        }
        Operation::Shuffle(p) => Ok(FrameStep::Sample {
            size: SampleSize::Fraction(1.0),
            replace: false,
            seed: p.seed.unwrap_or(DEFAULT_SEED),
        }),
        Operation::StringOp(p) => lower_string_op(p, ctx),
        Operation::DateExtract(p) => {
            let ty = ctx.require("column", &p.column)?;
            if ty != SemanticType::Datetime {
                return Err(WrangleError::validation(
                    "column",
                    format!("column '{}' is {}, not a date or datetime", p.column, ty),
                ));
            }
            Ok(FrameStep::WithColumns(vec![NamedExpr {
                name: p.output_name(),
                expr: call(p.part.function(), vec![ScalarExpr::column(p.column.as_str())])?,
            }]))
        }
        Operation::CreateColumn(p) => {
            if p.name.trim().is_empty() {
                return Err(WrangleError::validation("name", "must not be empty"));
            }
            Ok(FrameStep::WithColumns(vec![NamedExpr {
                name: p.name.clone(),
                expr: parse_checked("expression", &p.expression, ctx)?,
            }]))
        }
        Operation::WindowFunction(p) => {
            if let Some(c) = &p.column {
                ctx.require("column", c)?;
            }
            ctx.require_all("partition_by", &p.partition_by)?;
            ctx.require_all("order_by", &p.order_by)?;
            Ok(FrameStep::Window(WindowPlan {
                function: p.function,
                column: p.column.clone(),
                partition_by: p.partition_by.clone(),
                order_by: p.order_by.clone(),
                descending: !p.ascending,
                offset: p.offset,
                output: p.output_name(),
                columns: ctx.names(),
            }))
        }
        Operation::RelationalSelect(p) => {
            parse_checked("predicate", &p.predicate, ctx).map(FrameStep::Filter)
        }
        Operation::RelationalProject(p) => {
            ctx.require_all("attributes", &p.attributes)?;
            unique_names("attributes", &p.attributes)?;
            Ok(FrameStep::SelectColumns(p.attributes.clone()))
        }
    }
}

fn lower_filter(p: &FilterParams, ctx: &CompileContext) -> Result<ScalarExpr> {
    if let Some(text) = &p.expression {
        return parse_checked("expression", text, ctx);
    }
    let (Some(column), Some(operator)) = (&p.column, p.operator) else {
        return Err(WrangleError::internal("filter without column/operator passed validation"));
    };
    let ty = ctx.require("column", column)?;
    let target = ScalarExpr::column(column.as_str());
    let value = || -> Result<Literal> {
        let raw = p
            .value
            .as_ref()
            .ok_or_else(|| WrangleError::validation("value", "is required"))?;
        literal_of("value", raw)?
            .coerce_for(ty)
            .map_err(|e| WrangleError::validation("value", e))
    };
    let comparison = |op| -> Result<ScalarExpr> { Ok(target.clone().binary(op, ScalarExpr::lit(value()?))) };
    let text_value = || -> Result<ScalarExpr> {
        if ty != SemanticType::String {
            return Err(WrangleError::validation(
                "column",
                format!("column '{}' is {}, not a string", column, ty),
            ));
        }
        match p.value.as_ref().and_then(|v| v.as_str()) {
            Some(s) => Ok(ScalarExpr::lit(Literal::Str(s.to_string()))),
            None => Err(WrangleError::validation("value", "expected a string")),
        }
    };
    use crate::expr::BinaryOp;
    match operator {
        FilterOperator::Eq => comparison(BinaryOp::Eq),
        FilterOperator::NotEq => comparison(BinaryOp::NotEq),
        FilterOperator::Gt => comparison(BinaryOp::Gt),
        FilterOperator::GtEq => comparison(BinaryOp::GtEq),
        FilterOperator::Lt => comparison(BinaryOp::Lt),
        FilterOperator::LtEq => comparison(BinaryOp::LtEq),
        FilterOperator::Contains => call(Function::Contains, vec![target.clone(), text_value()?]),
        FilterOperator::StartsWith => call(Function::StartsWith, vec![target.clone(), text_value()?]),
        FilterOperator::EndsWith => call(Function::EndsWith, vec![target.clone(), text_value()?]),
        FilterOperator::Regex => {
            let pattern = text_value()?;
            if let ScalarExpr::Literal(Literal::Str(s)) = &pattern {
                regex::Regex::new(s).map_err(|e| {
                    WrangleError::validation("value", format!("invalid regular expression: {}", e))
                })?;
            }
            call(Function::Matches, vec![target.clone(), pattern])
        }
        FilterOperator::IsIn | FilterOperator::NotIn => {
            let raw = p
                .value
                .as_ref()
                .ok_or_else(|| WrangleError::validation("value", "is required"))?;
            let items = match raw {
                serde_json::Value::Array(items) => items.clone(),
                single => vec![single.clone()],
            };
            let values = items
                .iter()
                .map(|v| {
                    literal_of("value", v)?
                        .coerce_for(ty)
                        .map_err(|e| WrangleError::validation("value", e))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ScalarExpr::InList {
                expr: Box::new(target.clone()),
                values,
                negated: operator == FilterOperator::NotIn,
            })
        }
        FilterOperator::IsNull => call(Function::IsNull, vec![target.clone()]),
        FilterOperator::NotNull => call(Function::IsNotNull, vec![target.clone()]),
    }
}

fn lower_rename(field: &str, pairs: &[(String, String)], ctx: &CompileContext) -> Result<FrameStep> {
    let old: Vec<String> = pairs.iter().map(|(o, _)| o.clone()).collect();
    ctx.require_all(field, &old)?;
    unique_names(field, &old)?;
    for (_, new) in pairs {
        if new.trim().is_empty() {
            return Err(WrangleError::validation(field, "new names must not be empty"));
        }
    }
    let result: Vec<String> = ctx
        .names()
        .into_iter()
        .map(|c| {
            pairs
                .iter()
                .find(|(o, _)| *o == c)
                .map(|(_, n)| n.clone())
                .unwrap_or(c)
        })
        .collect();
    let mut seen = HashSet::new();
    for name in &result {
        if !seen.insert(name.as_str()) {
            return Err(WrangleError::validation(
                field,
                format!("renaming would create a second column named '{}'", name),
            ));
        }
    }
    let (old, new) = pairs
        .iter()
        .filter(|(o, n)| o != n)
        .cloned()
        .unzip();
    Ok(FrameStep::Rename { old, new })
}

/// The fill value as it applies to a column of type `ty`, if it fits.
fn fill_value_for(value: &Literal, ty: SemanticType) -> Option<Literal> {
    let lit = value.clone().coerce_for(ty).ok()?;
    let fits = matches!(
        (&lit, ty),
        (Literal::Int(_), SemanticType::Integer | SemanticType::Float)
            | (Literal::Float(_), SemanticType::Float)
            | (Literal::Str(_), SemanticType::String)
            | (Literal::Bool(_), SemanticType::Boolean)
            | (Literal::Date(_) | Literal::Timestamp(_), SemanticType::Datetime)
    );
    fits.then_some(lit)
}

fn lower_fillna(p: &FillnaParams, ctx: &CompileContext) -> Result<FrameStep> {
    let explicit = p.columns.is_some();
    let columns = match &p.columns {
        Some(c) => {
            ctx.require_all("columns", c)?;
            c.clone()
        }
        None => ctx.names(),
    };
    if let Some(method) = p.method {
        return Ok(FrameStep::FillStrategy { columns, method });
    }
    let Some(raw) = &p.value else {
        return Err(WrangleError::internal("fillna without value or method passed validation"));
    };
    let value = literal_of("value", raw)?;
    if value == Literal::Null {
        return Err(WrangleError::validation("value", "must not be null"));
    }
    let mut fills = Vec::new();
    for c in columns {
        let ty = ctx.require("columns", &c)?;
        match fill_value_for(&value, ty) {
            Some(v) => fills.push((c, v)),
            None if explicit => {
                return Err(WrangleError::validation(
                    "value",
                    format!("cannot fill {} column '{}' with {}", ty, c, raw),
                ))
            }
            None => {}
        }
    }
    if fills.is_empty() {
        return Err(WrangleError::validation(
            "value",
            format!("no column can hold the fill value {}", raw),
        ));
    }
    Ok(FrameStep::FillNull(fills))
}

fn lower_group(p: &GroupAggregateParams, ctx: &CompileContext) -> Result<FrameStep> {
    ctx.require_all("group_by", &p.group_by)?;
    unique_names("group_by", &p.group_by)?;
    let mut names: Vec<String> = p.group_by.clone();
    let mut aggs = Vec::with_capacity(p.aggregations.len());
    for spec in &p.aggregations {
        if let Some(c) = &spec.column {
            ctx.require("aggregations", c)?;
        }
        let name = spec.output_name();
        if names.contains(&name) {
            return Err(WrangleError::validation(
                "aggregations",
                format!("output column '{}' would appear twice", name),
            ));
        }
        names.push(name.clone());
        aggs.push(NamedExpr {
            name,
            expr: ScalarExpr::agg(spec.function, spec.column.as_deref().map(ScalarExpr::column)),
        });
    }
    Ok(FrameStep::GroupBy {
        keys: p.group_by.clone(),
        aggs,
    })
}

fn lower_melt(p: &MeltParams, ctx: &CompileContext) -> Result<FrameStep> {
    ctx.require_all("id_vars", &p.id_vars)?;
    let on = match &p.value_vars {
        Some(v) => {
            ctx.require_all("value_vars", v)?;
            v.clone()
        }
        None => ctx
            .names()
            .into_iter()
            .filter(|c| !p.id_vars.contains(c))
            .collect(),
    };
    if on.is_empty() {
        return Err(WrangleError::validation("value_vars", "no columns left to unpivot"));
    }
    if p.var_name == p.value_name {
        return Err(WrangleError::validation(
            "value_name",
            "must differ from var_name",
        ));
    }
    for (field, name) in [("var_name", &p.var_name), ("value_name", &p.value_name)] {
        if p.id_vars.contains(name) {
            return Err(WrangleError::validation(
                field,
                format!("'{}' is already an id column", name),
            ));
        }
    }
    Ok(FrameStep::Unpivot {
        index: p.id_vars.clone(),
        on,
        variable_name: p.var_name.clone(),
        value_name: p.value_name.clone(),
    })
}

fn lower_merge(p: &MergeParams, engine: Engine, ctx: &CompileContext) -> Result<JoinPlan> {
    let right_cols = ctx.related.get(&p.right).ok_or_else(|| {
        WrangleError::validation("right", format!("dataset '{}' is not loaded", p.right))
    })?;
    let pairs = p.key_pairs();
    let (left_field, right_field) = if p.on.is_some() {
        ("on", "on")
    } else {
        ("left_on", "right_on")
    };
    let left_keys: Vec<String> = pairs.iter().map(|(l, _)| l.clone()).collect();
    ctx.require_all(left_field, &left_keys)?;
    for (_, r) in &pairs {
        if !right_cols.iter().any(|c| c.name == *r) {
            return Err(WrangleError::validation(
                right_field,
                format!("column '{}' does not exist in '{}'", r, p.right),
            ));
        }
    }

    let left_names = ctx.names();
    let mut taken: HashSet<String> = left_names.iter().cloned().collect();
    let mut output: Vec<JoinOutput> = left_names.iter().cloned().map(JoinOutput::Column).collect();
    let mut right_columns: Vec<(String, String)> = Vec::with_capacity(right_cols.len());

    for c in right_cols {
        let orig = &c.name;
        let shared_key = pairs.iter().position(|(l, r)| l == r && r == orig);
        if let Some(i) = shared_key {
            let temp = format!("__right_key_{}", i);
            if p.how == JoinHow::Outer {
                if let Some(slot) = output
                    .iter_mut()
                    .find(|o| matches!(o, JoinOutput::Column(n) if n == orig))
                {
                    *slot = JoinOutput::CoalescedKey {
                        left: orig.clone(),
                        right: temp.clone(),
                    };
                }
            }
            right_columns.push((orig.clone(), temp));
            continue;
        }
        let name = if taken.contains(orig) {
            let renamed = format!("{}_right", orig);
            if taken.contains(&renamed) {
                return Err(WrangleError::compile(
                    OperationKind::Merge.as_str(),
                    engine,
                    format!(
                        "right column '{}' would be renamed to '{}', which already exists",
                        orig, renamed
                    ),
                ));
            }
            renamed
        } else {
            orig.clone()
        };
        taken.insert(name.clone());
        output.push(JoinOutput::Column(name.clone()));
        right_columns.push((orig.clone(), name));
    }

    let right_on = pairs
        .iter()
        .map(|(_, r)| {
            right_columns
                .iter()
                .find(|(o, _)| o == r)
                .map(|(_, renamed)| renamed.clone())
                .ok_or_else(|| WrangleError::internal(format!("right key '{}' lost", r)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(JoinPlan {
        right: p.right.clone(),
        how: p.how,
        left_on: left_keys,
        right_on,
        right_columns,
        output,
    })
}

fn lower_string_op(p: &StringOpParams, ctx: &CompileContext) -> Result<FrameStep> {
    let ty = ctx.require("column", &p.column)?;
    if ty != SemanticType::String {
        return Err(WrangleError::validation(
            "column",
            format!("column '{}' is {}, not a string", p.column, ty),
        ));
    }
    let target = ScalarExpr::column(p.column.as_str());
    let text = |field: &str, v: &Option<String>| -> Result<ScalarExpr> {
        v.as_ref()
            .map(|s| ScalarExpr::lit(Literal::Str(s.clone())))
            .ok_or_else(|| WrangleError::validation(field, "is required"))
    };
    let expr = match p.operation {
        StringOperation::Upper => call(Function::Upper, vec![target])?,
        StringOperation::Lower => call(Function::Lower, vec![target])?,
        StringOperation::Strip => call(Function::Trim, vec![target])?,
        StringOperation::Len => call(Function::Length, vec![target])?,
        StringOperation::Replace => call(
            Function::Replace,
            vec![
                target,
                text("pattern", &p.pattern)?,
                text("replacement", &p.replacement)?,
            ],
        )?,
        StringOperation::Contains => {
            call(Function::Contains, vec![target, text("pattern", &p.pattern)?])?
        }
        StringOperation::Startswith => {
            call(Function::StartsWith, vec![target, text("pattern", &p.pattern)?])?
        }
        StringOperation::Endswith => {
            call(Function::EndsWith, vec![target, text("pattern", &p.pattern)?])?
        }
    };
    Ok(FrameStep::WithColumns(vec![NamedExpr {
        name: p.output_name(),
        expr,
    }]))
}
