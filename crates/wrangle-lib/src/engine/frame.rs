//! Lowering of frame steps to polars plans, shared by the eager and lazy
//! adapters.

use polars::prelude::*;
use std::sync::Arc;

use super::ExecutionInput;
use crate::compile::{FrameStep, JoinOutput, JoinPlan, WindowPlan, ROW_INDEX};
use crate::expr::AggFunc;
use crate::operation::{FillMethod, JoinHow, KeepRow, NullHow, WindowFunc};
use crate::query::{parse_query, FrameQuery, NamedExpr};

fn columns(names: &[String]) -> Vec<Expr> {
    names.iter().map(|n| col(n.as_str())).collect()
}

fn named(exprs: &[NamedExpr]) -> Vec<Expr> {
    exprs
        .iter()
        .map(|n| n.expr.to_polars().alias(n.name.as_str()))
        .collect()
}

fn over(expr: Expr, partition_by: &[String]) -> Expr {
    if partition_by.is_empty() {
        expr
    } else {
        expr.over(columns(partition_by))
    }
}

fn sort_options(descending: Vec<bool>) -> SortMultipleOptions {
    SortMultipleOptions::default()
        .with_order_descending_multi(descending)
        .with_nulls_last(true)
        .with_maintain_order(true)
}

/// Add one step to a plan. Pivot and sample need the materialized frame, so
/// they collect what came before.
pub(crate) fn apply_step(
    lf: LazyFrame,
    step: &FrameStep,
    input: &ExecutionInput,
) -> PolarsResult<LazyFrame> {
    let lf = match step {
        FrameStep::Filter(pred) => lf.filter(pred.to_polars()),
        FrameStep::SelectColumns(names) => lf.select(columns(names)),
        FrameStep::DropColumns { keep, .. } => lf.select(columns(keep)),
        FrameStep::Rename { old, new } => lf.rename(old, new, true),
        FrameStep::WithColumns(exprs) => lf.with_columns(named(exprs)),
        FrameStep::FillNull(fills) => lf.with_columns(
            fills
                .iter()
                .map(|(c, v)| col(c.as_str()).fill_null(v.to_polars()))
                .collect::<Vec<_>>(),
        ),
        FrameStep::FillStrategy { columns: names, method } => {
            let strategy = match method {
                FillMethod::Forward => FillNullStrategy::Forward(None),
                FillMethod::Backward => FillNullStrategy::Backward(None),
            };
            lf.with_columns(
                names
                    .iter()
                    .map(|c| col(c.as_str()).fill_null_with_strategy(strategy))
                    .collect::<Vec<_>>(),
            )
        }
        FrameStep::DropNulls { subset, how } => {
            let present = subset.iter().map(|c| col(c.as_str()).is_not_null());
            let keep = match how {
                NullHow::Any => present.reduce(|a, b| a.and(b)),
                NullHow::All => present.reduce(|a, b| a.or(b)),
            };
            match keep {
                Some(pred) => lf.filter(pred),
                None => lf,
            }
        }
        FrameStep::Distinct {
            subset,
            keep,
            columns: names,
        } => {
            let row = || col(ROW_INDEX);
            let pred = match keep {
                KeepRow::First => row().eq(over(row().min(), subset)),
                KeepRow::Last => row().eq(over(row().max(), subset)),
                KeepRow::Neither => over(len(), subset).eq(lit(1)),
            };
            lf.with_row_index(ROW_INDEX, None)
                .filter(pred)
                .select(columns(names))
        }
        FrameStep::Sort { by, descending } => {
            lf.sort_by_exprs(columns(by), sort_options(descending.clone()))
        }
        FrameStep::GroupBy { keys, aggs } if keys.is_empty() => lf.select(named(aggs)),
        FrameStep::GroupBy { keys, aggs } => lf
            .group_by(columns(keys))
            .agg(named(aggs))
            .sort_by_exprs(columns(keys), sort_options(vec![false; keys.len()])),
        FrameStep::Pivot {
            index,
            on,
            values,
            agg,
        } => pivot(lf.collect()?, index, on, values, *agg)?.lazy(),
        FrameStep::Unpivot {
            index,
            on,
            variable_name,
            value_name,
        } => lf.unpivot(UnpivotArgsDSL {
            on: cols(on.iter().map(String::as_str)),
            index: cols(index.iter().map(String::as_str)),
            variable_name: Some(PlSmallStr::from(variable_name.as_str())),
            value_name: Some(PlSmallStr::from(value_name.as_str())),
        }),
        FrameStep::Join(plan) => join(lf, plan, input)?,
        FrameStep::Sample {
            size,
            replace,
            seed,
        } => {
            let df = lf.collect()?;
            let n = size.rows_for(df.height());
            df.sample_n_literal(n, *replace, true, Some(*seed))?.lazy()
        }
        FrameStep::Window(plan) => window(lf, plan),
    };
    Ok(lf)
}

fn pivot_agg(agg: AggFunc) -> Expr {
    let e = element();
    match agg {
        AggFunc::Sum => e.sum(),
        AggFunc::Mean => e.mean(),
        AggFunc::Min => e.min(),
        AggFunc::Max => e.max(),
        AggFunc::Count => e.count(),
        AggFunc::Median => e.median(),
        AggFunc::Std => e.std(1),
        AggFunc::NUnique => e.n_unique(),
        AggFunc::First => e.first(),
        AggFunc::Last => e.last(),
    }
}

/// Pivot panics on temporal index columns, so those go through their
/// physical integer type and are cast back afterwards.
fn pivot(
    df: DataFrame,
    index: &[String],
    on: &str,
    values: &str,
    agg: AggFunc,
) -> PolarsResult<DataFrame> {
    let mut df = df;
    let mut restore = Vec::new();
    for name in index {
        let dtype = df.column(name)?.dtype().clone();
        let physical = match dtype {
            DataType::Date => DataType::Int32,
            DataType::Datetime(_, _) => DataType::Int64,
            _ => continue,
        };
        let casted = df.column(name)?.cast(&physical)?;
        df.with_column(casted)?;
        restore.push((name.clone(), dtype));
    }

    let distinct = df.column(on)?.unique()?;
    let on_columns = Arc::new(DataFrame::new_infer_height(vec![distinct])?);
    let index_sel = if index.is_empty() {
        empty()
    } else {
        cols(index.iter().map(String::as_str))
    };
    let mut out = df
        .lazy()
        .pivot(
            cols([on]),
            on_columns,
            index_sel,
            cols([values]),
            pivot_agg(agg),
            true,
            PlSmallStr::from_static("_"),
        )
        .collect()?;

    for (name, dtype) in &restore {
        let restored = out.column(name)?.cast(dtype)?;
        out.with_column(restored)?;
    }
    Ok(out)
}

fn join(lf: LazyFrame, plan: &JoinPlan, input: &ExecutionInput) -> PolarsResult<LazyFrame> {
    let right = input
        .related_frame(&plan.right)?
        .clone()
        .lazy()
        .select(
            plan.right_columns
                .iter()
                .map(|(orig, renamed)| col(orig.as_str()).alias(renamed.as_str()))
                .collect::<Vec<_>>(),
        );
    let how = match plan.how {
        JoinHow::Inner => JoinType::Inner,
        JoinHow::Left => JoinType::Left,
        JoinHow::Outer => JoinType::Full,
    };
    let output: Vec<Expr> = plan
        .output
        .iter()
        .map(|o| match o {
            JoinOutput::Column(name) => col(name.as_str()),
            JoinOutput::CoalescedKey { left, right } => {
                coalesce(&[col(left.as_str()), col(right.as_str())]).alias(left.as_str())
            }
        })
        .collect();
    Ok(lf
        .join(
            right,
            columns(&plan.left_on),
            columns(&plan.right_on),
            JoinArgs::new(how).with_coalesce(JoinCoalesce::KeepColumns),
        )
        .select(output))
}

/// Window value expressions, as successive `with_column` stages. Later
/// stages read the temporaries of earlier ones.
fn window_stages(plan: &WindowPlan) -> Vec<Expr> {
    let p = &plan.partition_by;
    let output = plan.output.as_str();
    let target = || col(plan.column.as_deref().unwrap_or_default());
    let row_number = || {
        over(col(ROW_INDEX).cum_count(false), p)
            .cast(DataType::Int64)
            .alias("__rn")
    };
    let mut ties = p.clone();
    ties.extend(plan.order_by.iter().cloned());

    match plan.function {
        WindowFunc::RowNumber => vec![row_number().alias(output)],
        WindowFunc::Rank => vec![
            row_number(),
            over(col("__rn").min(), &ties).alias(output),
        ],
        WindowFunc::DenseRank => vec![
            row_number(),
            col("__rn")
                .eq(over(col("__rn").min(), &ties))
                .cast(DataType::Int64)
                .alias("__first"),
            over(col("__first").cum_sum(false), p).alias(output),
        ],
        WindowFunc::Cumsum => vec![over(target().cum_sum(false), p).alias(output)],
        WindowFunc::Cummin => vec![over(target().cum_min(false), p).alias(output)],
        WindowFunc::Cummax => vec![over(target().cum_max(false), p).alias(output)],
        WindowFunc::Lead => vec![over(target().shift(lit(-plan.offset)), p).alias(output)],
        WindowFunc::Lag => vec![over(target().shift(lit(plan.offset)), p).alias(output)],
        WindowFunc::Count if plan.column.is_none() => vec![over(len(), p).alias(output)],
        WindowFunc::Sum => vec![over(target().sum(), p).alias(output)],
        WindowFunc::Mean => vec![over(target().mean(), p).alias(output)],
        WindowFunc::Min => vec![over(target().min(), p).alias(output)],
        WindowFunc::Max => vec![over(target().max(), p).alias(output)],
        WindowFunc::Count => vec![over(target().count(), p).alias(output)],
    }
}

fn window(lf: LazyFrame, plan: &WindowPlan) -> LazyFrame {
    let ordered = plan.function.is_ordered();
    let mut lf = lf.with_row_index(ROW_INDEX, None);
    if ordered {
        let mut by = plan.partition_by.clone();
        by.extend(plan.order_by.iter().cloned());
        by.push(ROW_INDEX.to_string());
        let mut descending = vec![false; plan.partition_by.len()];
        descending.extend(std::iter::repeat(plan.descending).take(plan.order_by.len()));
        descending.push(false);
        lf = lf.sort_by_exprs(columns(&by), sort_options(descending));
    }
    for stage in window_stages(plan) {
        lf = lf.with_column(stage);
    }
    if ordered {
        lf = lf.sort([ROW_INDEX], SortMultipleOptions::default());
    }
    lf.select(columns(&plan.result_columns()))
}

/// Run a parsed `select ... by ... where ...` query.
pub(crate) fn apply_query(lf: LazyFrame, query: &FrameQuery) -> LazyFrame {
    let lf = match &query.filter {
        Some(pred) => lf.filter(pred.to_polars()),
        None => lf,
    };
    if query.by.is_empty() {
        if query.select.is_empty() {
            return lf;
        }
        return lf.select(named(&query.select));
    }
    let keys = named(&query.by);
    let key_names: Vec<String> = query.by.iter().map(|k| k.name.clone()).collect();
    let aggs = if query.select.is_empty() {
        vec![len().alias("count")]
    } else {
        named(&query.select)
    };
    lf.group_by(keys)
        .agg(aggs)
        .sort_by_exprs(columns(&key_names), sort_options(vec![false; key_names.len()]))
}

/// Parse raw query text into a plan over `lf`.
pub(crate) fn run_raw_query(lf: LazyFrame, text: &str) -> PolarsResult<LazyFrame> {
    let query = parse_query(text).map_err(|e| PolarsError::ComputeError(e.into()))?;
    Ok(apply_query(lf, &query))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::{SampleSize, ROW_INDEX};
    use crate::snapshot::Snapshot;

    fn input() -> ExecutionInput {
        let df = df!(
            "id" => [1i64, 2, 3, 4, 5],
            "grp" => ["a", "b", "a", "b", "a"],
            "x" => [Some(10i64), None, Some(30), Some(40), Some(30)]
        )
        .unwrap();
        ExecutionInput::new(Snapshot::new("t", df).unwrap())
    }

    fn run(step: FrameStep) -> DataFrame {
        let input = input();
        apply_step(input.primary.frame().clone().lazy(), &step, &input)
            .unwrap()
            .collect()
            .unwrap()
    }

    fn ints(df: &DataFrame, name: &str) -> Vec<Option<i64>> {
        df.column(name)
            .unwrap()
            .cast(&DataType::Int64)
            .unwrap()
            .i64()
            .unwrap()
            .into_iter()
            .collect()
    }

    fn window_plan(function: WindowFunc, column: Option<&str>) -> WindowPlan {
        WindowPlan {
            function,
            column: column.map(str::to_string),
            partition_by: vec!["grp".to_string()],
            order_by: vec!["x".to_string()],
            descending: false,
            offset: 1,
            output: "out".to_string(),
            columns: vec!["id".to_string(), "grp".to_string(), "x".to_string()],
        }
    }

    #[test]
    fn test_row_number_restores_order() {
        let df = run(FrameStep::Window(window_plan(WindowFunc::RowNumber, None)));
        assert_eq!(ints(&df, "id"), vec![Some(1), Some(2), Some(3), Some(4), Some(5)]);
        // a: x=10 -> 1, x=30 (id 3) -> 2, x=30 (id 5) -> 3; b: x=40 -> 1, null -> 2
        assert_eq!(ints(&df, "out"), vec![Some(1), Some(2), Some(2), Some(1), Some(3)]);
        assert!(df.column(ROW_INDEX).is_err());
    }

    #[test]
    fn test_rank_and_dense_rank_share_ties() {
        let rank = run(FrameStep::Window(window_plan(WindowFunc::Rank, None)));
        assert_eq!(ints(&rank, "out"), vec![Some(1), Some(2), Some(2), Some(1), Some(2)]);
        let dense = run(FrameStep::Window(window_plan(WindowFunc::DenseRank, None)));
        assert_eq!(ints(&dense, "out"), vec![Some(1), Some(2), Some(2), Some(1), Some(2)]);
    }

    #[test]
    fn test_lag_within_partition() {
        let df = run(FrameStep::Window(window_plan(WindowFunc::Lag, Some("x"))));
        assert_eq!(ints(&df, "out"), vec![None, Some(40), Some(10), None, Some(30)]);
    }

    #[test]
    fn test_partition_sum_broadcasts() {
        let mut plan = window_plan(WindowFunc::Sum, Some("x"));
        plan.order_by.clear();
        let df = run(FrameStep::Window(plan));
        assert_eq!(ints(&df, "out"), vec![Some(70), Some(40), Some(70), Some(40), Some(70)]);
    }

    #[test]
    fn test_distinct_keep_variants() {
        let subset = vec!["grp".to_string()];
        let all = vec!["id".to_string(), "grp".to_string(), "x".to_string()];
        let first = run(FrameStep::Distinct {
            subset: subset.clone(),
            keep: KeepRow::First,
            columns: all.clone(),
        });
        assert_eq!(ints(&first, "id"), vec![Some(1), Some(2)]);
        let last = run(FrameStep::Distinct {
            subset: subset.clone(),
            keep: KeepRow::Last,
            columns: all.clone(),
        });
        assert_eq!(ints(&last, "id"), vec![Some(4), Some(5)]);
        let none = run(FrameStep::Distinct {
            subset: vec!["x".to_string()],
            keep: KeepRow::Neither,
            columns: all,
        });
        assert_eq!(ints(&none, "id"), vec![Some(1), Some(2), Some(4)]);
    }

    #[test]
    fn test_sort_puts_nulls_last() {
        let df = run(FrameStep::Sort {
            by: vec!["x".to_string()],
            descending: vec![true],
        });
        assert_eq!(ints(&df, "x"), vec![Some(40), Some(30), Some(30), Some(10), None]);
        // stable among equal keys
        assert_eq!(ints(&df, "id")[1..3], [Some(3), Some(5)]);
    }

    #[test]
    fn test_drop_nulls_and_fill_strategy() {
        let dropped = run(FrameStep::DropNulls {
            subset: vec!["x".to_string()],
            how: NullHow::Any,
        });
        assert_eq!(dropped.height(), 4);
        let filled = run(FrameStep::FillStrategy {
            columns: vec!["x".to_string()],
            method: FillMethod::Forward,
        });
        assert_eq!(ints(&filled, "x")[1], Some(10));
    }

    #[test]
    fn test_sample_is_seeded() {
        let step = FrameStep::Sample {
            size: SampleSize::Rows(3),
            replace: false,
            seed: 7,
        };
        let a = run(step.clone());
        let b = run(step);
        assert_eq!(a.height(), 3);
        assert!(a.equals_missing(&b));
    }

    #[test]
    fn test_raw_query_groups_and_sorts() {
        let input = input();
        let df = run_raw_query(
            input.primary.frame().clone().lazy(),
            "select total: sum x by grp where id > 1",
        )
        .unwrap()
        .collect()
        .unwrap();
        assert_eq!(ints(&df, "total"), vec![Some(60), Some(40)]);
        assert!(run_raw_query(input.primary.frame().clone().lazy(), "delete everything").is_err());
    }
}
