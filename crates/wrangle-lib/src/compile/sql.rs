//! SQL select trees for the relational engine.
//!
//! Only this module produces SQL text. Identifiers and literals go through
//! [`quote_ident`] and the expression renderer, never through format strings
//! holding user input.

use super::frame::{FrameStep, JoinOutput, JoinPlan};
use crate::expr::{quote_ident, AggFunc, Function, ScalarExpr};
use crate::operation::{JoinHow, KeepRow, NullHow};

const LEFT_ALIAS: &str = "l";
const RIGHT_ALIAS: &str = "r";

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Scalar(ScalarExpr),
    /// `"table"."column"`.
    Qualified { table: String, column: String },
    /// `AGG(arg) OVER (PARTITION BY ...)`; `arg = None` counts rows.
    Window {
        func: AggFunc,
        arg: Option<ScalarExpr>,
        partition_by: Vec<String>,
    },
}

impl SqlExpr {
    pub fn column(name: impl Into<String>) -> Self {
        Self::Scalar(ScalarExpr::column(name))
    }

    fn render(&self) -> String {
        match self {
            Self::Scalar(e) => e.to_sql(),
            Self::Qualified { table, column } => {
                format!("{}.{}", quote_ident(table), quote_ident(column))
            }
            Self::Window {
                func,
                arg,
                partition_by,
            } => {
                let agg = ScalarExpr::agg(*func, arg.clone()).to_sql();
                let partition = partition_by
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{} OVER (PARTITION BY {})", agg, partition)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlItem {
    pub expr: SqlExpr,
    pub alias: Option<String>,
}

impl SqlItem {
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            expr: SqlExpr::column(name),
            alias: None,
        }
    }

    pub fn aliased(expr: SqlExpr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }

    fn render(&self) -> String {
        match &self.alias {
            // A bare column already carries its own name.
            Some(alias) if self.expr != SqlExpr::column(alias.as_str()) => {
                format!("{} AS {}", self.expr.render(), quote_ident(alias))
            }
            _ => self.expr.render(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlSource {
    Table { name: String, alias: Option<String> },
    Subquery { query: Box<SqlSelect>, alias: String },
}

impl SqlSource {
    pub fn table(name: impl Into<String>) -> Self {
        Self::Table {
            name: name.into(),
            alias: None,
        }
    }

    /// The same source under a new alias.
    pub fn with_alias(self, alias: impl Into<String>) -> Self {
        match self {
            Self::Table { name, .. } => Self::Table {
                name,
                alias: Some(alias.into()),
            },
            Self::Subquery { query, .. } => Self::Subquery {
                query,
                alias: alias.into(),
            },
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Table { name, alias: None } => quote_ident(name),
            Self::Table {
                name,
                alias: Some(alias),
            } => format!("{} AS {}", quote_ident(name), quote_ident(alias)),
            Self::Subquery { query, alias } => {
                format!("({}) AS {}", query.render(), quote_ident(alias))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlJoin {
    pub how: JoinHow,
    /// Right relation; rendered under `alias`.
    pub source: SqlSource,
    pub alias: String,
    /// `(left_alias, left_column, right_column)` equality pairs.
    pub on: Vec<(String, String, String)>,
}

impl SqlJoin {
    fn render(&self) -> String {
        let kind = match self.how {
            JoinHow::Inner => "INNER JOIN",
            JoinHow::Left => "LEFT JOIN",
            JoinHow::Outer => "FULL JOIN",
        };
        let on = self
            .on
            .iter()
            .map(|(l_alias, l, r)| {
                format!(
                    "{}.{} = {}.{}",
                    quote_ident(l_alias),
                    quote_ident(l),
                    quote_ident(&self.alias),
                    quote_ident(r)
                )
            })
            .collect::<Vec<_>>()
            .join(" AND ");
        format!(
            "{} {} ON {}",
            kind,
            self.source.clone().with_alias(self.alias.as_str()).render(),
            on
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SqlSelect {
    pub distinct: bool,
    /// Empty selects `*`.
    pub projection: Vec<SqlItem>,
    pub from: SqlSource,
    pub joins: Vec<SqlJoin>,
    pub filter: Option<ScalarExpr>,
    pub group_by: Vec<String>,
    /// `(column, descending)`; nulls always sort last.
    pub order_by: Vec<(String, bool)>,
}

impl SqlSelect {
    pub fn from(source: SqlSource) -> Self {
        Self {
            distinct: false,
            projection: Vec::new(),
            from: source,
            joins: Vec::new(),
            filter: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
        }
    }

    pub fn project(mut self, items: Vec<SqlItem>) -> Self {
        self.projection = items;
        self
    }

    pub fn filter(mut self, predicate: ScalarExpr) -> Self {
        self.filter = Some(predicate);
        self
    }

    pub fn render(&self) -> String {
        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.projection.is_empty() {
            sql.push('*');
        } else {
            let items: Vec<String> = self.projection.iter().map(SqlItem::render).collect();
            sql.push_str(&items.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&self.from.render());
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.render());
        }
        if let Some(pred) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(&pred.to_sql());
        }
        if !self.group_by.is_empty() {
            let keys: Vec<String> = self.group_by.iter().map(|c| quote_ident(c)).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&keys.join(", "));
        }
        if !self.order_by.is_empty() {
            let keys: Vec<String> = self
                .order_by
                .iter()
                .map(|(c, desc)| {
                    format!(
                        "{} {} NULLS LAST",
                        quote_ident(c),
                        if *desc { "DESC" } else { "ASC" }
                    )
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }
        sql
    }
}

/// Projection over `columns` in order where `replace` entries overwrite a
/// same-named column in place and the rest are appended.
pub fn with_columns(columns: &[String], replace: Vec<(String, SqlExpr)>) -> Vec<SqlItem> {
    let mut items: Vec<SqlItem> = columns.iter().map(SqlItem::column).collect();
    for (name, expr) in replace {
        match columns.iter().position(|c| *c == name) {
            Some(i) => items[i] = SqlItem::aliased(expr, name),
            None => items.push(SqlItem::aliased(expr, name)),
        }
    }
    items
}

fn not_null_chain(columns: &[String], conjunction: bool) -> Option<ScalarExpr> {
    columns
        .iter()
        .map(|c| ScalarExpr::Call {
            func: Function::IsNotNull,
            args: vec![ScalarExpr::column(c.as_str())],
        })
        .reduce(|a, b| if conjunction { a.and(b) } else { a.or(b) })
}

/// Translate one frame step to a select over `source`, whose columns are
/// `columns`. `Err` carries the reason the relational engine cannot match
/// the frame semantics.
pub fn translate(step: &FrameStep, source: SqlSource, columns: &[String]) -> Result<SqlSelect, String> {
    let select = SqlSelect::from(source);
    match step {
        FrameStep::Filter(pred) => Ok(select.filter(pred.clone())),
        FrameStep::SelectColumns(keep) | FrameStep::DropColumns { keep, .. } => {
            Ok(select.project(keep.iter().map(SqlItem::column).collect()))
        }
        FrameStep::Rename { old, new } => {
            let items = columns
                .iter()
                .map(|c| match old.iter().position(|o| o == c) {
                    Some(i) => SqlItem::aliased(SqlExpr::column(c.as_str()), new[i].as_str()),
                    None => SqlItem::column(c.as_str()),
                })
                .collect();
            Ok(select.project(items))
        }
        FrameStep::WithColumns(exprs) => Ok(select.project(with_columns(
            columns,
            exprs
                .iter()
                .map(|n| (n.name.clone(), SqlExpr::Scalar(n.expr.clone())))
                .collect(),
        ))),
        FrameStep::FillNull(fills) => Ok(select.project(with_columns(
            columns,
            fills
                .iter()
                .map(|(c, v)| {
                    let filled = ScalarExpr::Call {
                        func: Function::Coalesce,
                        args: vec![ScalarExpr::column(c.as_str()), ScalarExpr::lit(v.clone())],
                    };
                    (c.clone(), SqlExpr::Scalar(filled))
                })
                .collect(),
        ))),
        FrameStep::FillStrategy { .. } => {
            Err("filling by method depends on row order, which SQL does not define".to_string())
        }
        FrameStep::DropNulls { subset, how } => {
            let pred = not_null_chain(subset, *how == NullHow::Any);
            Ok(match pred {
                Some(p) => select.filter(p),
                None => select,
            })
        }
        FrameStep::Distinct { subset, keep, .. } => {
            if *keep == KeepRow::Neither {
                return Err("keep = none has no SQL DISTINCT equivalent".to_string());
            }
            if subset.as_slice() != columns {
                return Err("DISTINCT cannot keep whole rows for a subset of columns".to_string());
            }
            let mut select = select;
            select.distinct = true;
            Ok(select)
        }
        FrameStep::Sort { by, descending } => {
            let mut select = select;
            select.order_by = by.iter().cloned().zip(descending.iter().copied()).collect();
            Ok(select)
        }
        FrameStep::GroupBy { keys, aggs } => {
            for agg in aggs {
                if let ScalarExpr::Agg { func, .. } = &agg.expr {
                    if !func.has_sql_equivalent() {
                        return Err(format!(
                            "the {} aggregation depends on row order, which SQL does not define",
                            func.name()
                        ));
                    }
                }
            }
            let mut items: Vec<SqlItem> = keys.iter().map(SqlItem::column).collect();
            items.extend(
                aggs.iter()
                    .map(|n| SqlItem::aliased(SqlExpr::Scalar(n.expr.clone()), n.name.as_str())),
            );
            let mut select = select.project(items);
            select.group_by = keys.clone();
            select.order_by = keys.iter().map(|k| (k.clone(), false)).collect();
            Ok(select)
        }
        FrameStep::Join(plan) => translate_join(plan, select, columns),
        FrameStep::Window(plan) => {
            if plan.function.is_ordered() {
                return Err(format!(
                    "ordered window function {} is not supported; use a frame engine",
                    plan.function.as_str()
                ));
            }
            if plan.partition_by.is_empty() {
                return Err("window functions need a partition_by on this engine".to_string());
            }
            let func = plan
                .function
                .partition_agg()
                .ok_or_else(|| format!("{} has no SQL form", plan.function.as_str()))?;
            let window = SqlExpr::Window {
                func,
                arg: plan.column.as_deref().map(ScalarExpr::column),
                partition_by: plan.partition_by.clone(),
            };
            Ok(select.project(with_columns(columns, vec![(plan.output.clone(), window)])))
        }
        FrameStep::Pivot { .. } | FrameStep::Unpivot { .. } | FrameStep::Sample { .. } => {
            Err("reshaping and sampling are only available on frame engines".to_string())
        }
    }
}

/// The right relation is renamed inside a subquery first, so every name in
/// the joined row is unique and qualified references cannot resolve to the
/// left side.
fn translate_join(plan: &JoinPlan, select: SqlSelect, columns: &[String]) -> Result<SqlSelect, String> {
    if plan.how == JoinHow::Outer {
        return Err("full outer joins cannot coalesce keys the same way; use a frame engine".to_string());
    }
    let right = SqlSelect::from(SqlSource::table(plan.right.as_str())).project(
        plan.right_columns
            .iter()
            .map(|(orig, renamed)| SqlItem::aliased(SqlExpr::column(orig.as_str()), renamed.as_str()))
            .collect(),
    );
    let on = plan
        .left_on
        .iter()
        .zip(&plan.right_on)
        .map(|(l, r)| (LEFT_ALIAS.to_string(), l.clone(), r.clone()))
        .collect();
    let mut items = Vec::with_capacity(plan.output.len());
    for out in &plan.output {
        let JoinOutput::Column(name) = out else {
            return Err("coalesced keys are only produced by full joins".to_string());
        };
        let table = if columns.contains(name) {
            LEFT_ALIAS
        } else if plan.right_columns.iter().any(|(_, r)| r == name) {
            RIGHT_ALIAS
        } else {
            return Err(format!("unknown join column '{}'", name));
        };
        items.push(SqlItem::aliased(
            SqlExpr::Qualified {
                table: table.to_string(),
                column: name.clone(),
            },
            name.as_str(),
        ));
    }
    let mut select = SqlSelect {
        from: select.from.with_alias(LEFT_ALIAS),
        ..select
    }
    .project(items);
    select.joins.push(SqlJoin {
        how: plan.how,
        source: SqlSource::Subquery {
            query: Box::new(right),
            alias: RIGHT_ALIAS.to_string(),
        },
        alias: RIGHT_ALIAS.to_string(),
        on,
    });
    Ok(select)
}
