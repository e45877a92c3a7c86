//! Frame-step programs, run by the eager and lazy engines.
//!
//! A program is a list of steps over one frame. Steps hold everything the
//! adapters need (resolved column lists, renamed join columns) so execution
//! never has to look at the input schema again.

use crate::engine::Engine;
use crate::expr::{AggFunc, Literal, ScalarExpr};
use crate::operation::{FillMethod, JoinHow, KeepRow, NullHow, WindowFunc};
use crate::query::NamedExpr;

/// Temporary row index used by order-sensitive steps.
pub const ROW_INDEX: &str = "__row";

#[derive(Debug, Clone, PartialEq)]
pub enum FrameStep {
    Filter(ScalarExpr),
    SelectColumns(Vec<String>),
    /// `keep` is the complement of `drop`, for engines that project instead.
    DropColumns {
        drop: Vec<String>,
        keep: Vec<String>,
    },
    Rename {
        old: Vec<String>,
        new: Vec<String>,
    },
    WithColumns(Vec<NamedExpr>),
    FillNull(Vec<(String, Literal)>),
    FillStrategy {
        columns: Vec<String>,
        method: FillMethod,
    },
    DropNulls {
        subset: Vec<String>,
        how: NullHow,
    },
    Distinct {
        subset: Vec<String>,
        keep: KeepRow,
        columns: Vec<String>,
    },
    Sort {
        by: Vec<String>,
        descending: Vec<bool>,
    },
    GroupBy {
        keys: Vec<String>,
        aggs: Vec<NamedExpr>,
    },
    Pivot {
        index: Vec<String>,
        on: String,
        values: String,
        agg: AggFunc,
    },
    Unpivot {
        index: Vec<String>,
        on: Vec<String>,
        variable_name: String,
        value_name: String,
    },
    Join(JoinPlan),
    Sample {
        size: SampleSize,
        replace: bool,
        seed: u64,
    },
    Window(WindowPlan),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleSize {
    Rows(u64),
    Fraction(f64),
}

impl SampleSize {
    pub fn rows_for(self, height: usize) -> usize {
        match self {
            Self::Rows(n) => n as usize,
            Self::Fraction(f) => (f * height as f64).round() as usize,
        }
    }
}

/// One column of a join result.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutput {
    Column(String),
    /// Same-named key of a full join: left value, else right value.
    CoalescedKey { left: String, right: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlan {
    pub right: String,
    pub how: JoinHow,
    pub left_on: Vec<String>,
    /// Right keys, after renaming.
    pub right_on: Vec<String>,
    /// Right columns `(original, renamed)` brought into the join.
    pub right_columns: Vec<(String, String)>,
    pub output: Vec<JoinOutput>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowPlan {
    pub function: WindowFunc,
    pub column: Option<String>,
    pub partition_by: Vec<String>,
    pub order_by: Vec<String>,
    pub descending: bool,
    pub offset: i64,
    pub output: String,
    /// Input columns in order.
    pub columns: Vec<String>,
}

impl WindowPlan {
    /// Result columns: input columns, with the output replacing a same-named
    /// column in place or appended at the end.
    pub fn result_columns(&self) -> Vec<String> {
        let mut out = self.columns.clone();
        if !out.contains(&self.output) {
            out.push(self.output.clone());
        }
        out
    }
}

fn str_list(items: &[String]) -> String {
    format!(
        "[{}]",
        items
            .iter()
            .map(|s| format!("{:?}", s))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

fn col_list(items: &[String]) -> String {
    format!(
        "[{}]",
        items
            .iter()
            .map(|s| format!("col({:?})", s))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

fn named_list(items: &[NamedExpr]) -> String {
    format!(
        "[{}]",
        items
            .iter()
            .map(|n| format!("{}.alias({:?})", n.expr.to_code(), n.name))
            .collect::<Vec<_>>()
            .join(", ")
    )
}

fn over_code(expr: String, partition_by: &[String]) -> String {
    if partition_by.is_empty() {
        expr
    } else {
        format!("{}.over({})", expr, col_list(partition_by))
    }
}

fn sort_options_code(descending: &[bool]) -> String {
    format!(
        "SortMultipleOptions::default().with_order_descending_multi({:?}).with_nulls_last(true).with_maintain_order(true)",
        descending
    )
}

fn agg_element_code(agg: AggFunc) -> &'static str {
    match agg {
        AggFunc::Sum => "element().sum()",
        AggFunc::Mean => "element().mean()",
        AggFunc::Min => "element().min()",
        AggFunc::Max => "element().max()",
        AggFunc::Count => "element().count()",
        AggFunc::Median => "element().median()",
        AggFunc::Std => "element().std(1)",
        AggFunc::NUnique => "element().n_unique()",
        AggFunc::First => "element().first()",
        AggFunc::Last => "element().last()",
    }
}

fn window_value_code(plan: &WindowPlan) -> Vec<String> {
    let column = plan.column.as_deref().unwrap_or_default();
    let p = &plan.partition_by;
    let rn = format!(
        "{}.cast(DataType::Int64)",
        over_code(format!("col({:?}).cum_count(false)", ROW_INDEX), p)
    );
    let mut ties = p.clone();
    ties.extend(plan.order_by.iter().cloned());
    match plan.function {
        WindowFunc::RowNumber => vec![format!(".with_column({}.alias({:?}))", rn, plan.output)],
        WindowFunc::Rank => vec![
            format!(".with_column({}.alias(\"__rn\"))", rn),
            format!(
                ".with_column({}.alias({:?}))",
                over_code("col(\"__rn\").min()".to_string(), &ties),
                plan.output
            ),
        ],
        WindowFunc::DenseRank => vec![
            format!(".with_column({}.alias(\"__rn\"))", rn),
            format!(
                ".with_column(col(\"__rn\").eq({}).cast(DataType::Int64).alias(\"__first\"))",
                over_code("col(\"__rn\").min()".to_string(), &ties)
            ),
            format!(
                ".with_column({}.alias({:?}))",
                over_code("col(\"__first\").cum_sum(false)".to_string(), p),
                plan.output
            ),
        ],
        WindowFunc::Cumsum | WindowFunc::Cummin | WindowFunc::Cummax => {
            let method = match plan.function {
                WindowFunc::Cumsum => "cum_sum",
                WindowFunc::Cummin => "cum_min",
                _ => "cum_max",
            };
            vec![format!(
                ".with_column({}.alias({:?}))",
                over_code(format!("col({:?}).{}(false)", column, method), p),
                plan.output
            )]
        }
        WindowFunc::Lead | WindowFunc::Lag => {
            let shift = if plan.function == WindowFunc::Lead {
                -plan.offset
            } else {
                plan.offset
            };
            vec![format!(
                ".with_column({}.alias({:?}))",
                over_code(format!("col({:?}).shift(lit({}))", column, shift), p),
                plan.output
            )]
        }
        WindowFunc::Count if plan.column.is_none() => vec![format!(
            ".with_column({}.alias({:?}))",
            over_code("len()".to_string(), p),
            plan.output
        )],
        other => {
            let agg = other.partition_agg().map(AggFunc::name).unwrap_or("sum");
            vec![format!(
                ".with_column({}.alias({:?}))",
                over_code(format!("col({:?}).{}()", column, agg), p),
                plan.output
            )]
        }
    }
}

impl FrameStep {
    /// Whether the eager engine runs this step with a native `DataFrame`
    /// method rather than a one-step lazy plan.
    pub fn is_eager_native(&self) -> bool {
        matches!(
            self,
            Self::SelectColumns(_)
                | Self::DropColumns { .. }
                | Self::Sort { .. }
                | Self::Sample { .. }
        )
    }

    /// Lines declared before the chain that uses them.
    fn preamble(&self) -> Vec<String> {
        match self {
            Self::Join(plan) => vec![format!(
                "let right = related({:?})?.clone().lazy().select([{}]);",
                plan.right,
                plan.right_columns
                    .iter()
                    .map(|(o, r)| format!("col({:?}).alias({:?})", o, r))
                    .collect::<Vec<_>>()
                    .join(", ")
            )],
            Self::Pivot { on, .. } => vec![format!(
                "let on_values = Arc::new(DataFrame::new_infer_height(vec![df.column({:?})?.unique()?])?);",
                on
            )],
            _ => Vec::new(),
        }
    }

    /// Method calls on a `LazyFrame`, one per line.
    pub fn lazy_calls(&self) -> Vec<String> {
        match self {
            Self::Filter(pred) => vec![format!(".filter({})", pred.to_code())],
            Self::SelectColumns(columns) => vec![format!(".select({})", col_list(columns))],
            Self::DropColumns { keep, .. } => vec![format!(".select({})", col_list(keep))],
            Self::Rename { old, new } => vec![format!(
                ".rename({}, {}, true)",
                str_list(old),
                str_list(new)
            )],
            Self::WithColumns(exprs) => vec![format!(".with_columns({})", named_list(exprs))],
            Self::FillNull(fills) => vec![format!(
                ".with_columns([{}])",
                fills
                    .iter()
                    .map(|(c, v)| format!("col({:?}).fill_null({})", c, v.to_code()))
                    .collect::<Vec<_>>()
                    .join(", ")
            )],
            Self::FillStrategy { columns, method } => {
                let strategy = match method {
                    FillMethod::Forward => "FillNullStrategy::Forward(None)",
                    FillMethod::Backward => "FillNullStrategy::Backward(None)",
                };
                vec![format!(
                    ".with_columns([{}])",
                    columns
                        .iter()
                        .map(|c| format!("col({:?}).fill_null_with_strategy({})", c, strategy))
                        .collect::<Vec<_>>()
                        .join(", ")
                )]
            }
            Self::DropNulls { subset, how } => {
                let (test, join) = match how {
                    NullHow::Any => ("is_not_null", "and"),
                    NullHow::All => ("is_not_null", "or"),
                };
                let pred = subset
                    .iter()
                    .map(|c| format!("col({:?}).{}()", c, test))
                    .reduce(|a, b| format!("{}.{}({})", a, join, b))
                    .unwrap_or_else(|| "lit(true)".to_string());
                vec![format!(".filter({})", pred)]
            }
            Self::Distinct {
                subset,
                keep,
                columns,
            } => {
                let pred = match keep {
                    KeepRow::First => format!(
                        "col({:?}).eq({})",
                        ROW_INDEX,
                        over_code(format!("col({:?}).min()", ROW_INDEX), subset)
                    ),
                    KeepRow::Last => format!(
                        "col({:?}).eq({})",
                        ROW_INDEX,
                        over_code(format!("col({:?}).max()", ROW_INDEX), subset)
                    ),
                    KeepRow::Neither => format!("{}.eq(lit(1))", over_code("len()".to_string(), subset)),
                };
                vec![
                    format!(".with_row_index({:?}, None)", ROW_INDEX),
                    format!(".filter({})", pred),
                    format!(".select({})", col_list(columns)),
                ]
            }
            Self::Sort { by, descending } => vec![format!(
                ".sort_by_exprs({}, {})",
                col_list(by),
                sort_options_code(descending)
            )],
            Self::GroupBy { keys, aggs } if keys.is_empty() => {
                vec![format!(".select({})", named_list(aggs))]
            }
            Self::GroupBy { keys, aggs } => vec![
                format!(".group_by({})", col_list(keys)),
                format!(".agg({})", named_list(aggs)),
                format!(
                    ".sort_by_exprs({}, {})",
                    col_list(keys),
                    sort_options_code(&vec![false; keys.len()])
                ),
            ],
            Self::Pivot {
                index,
                on,
                values,
                agg,
            } => vec![format!(
                ".pivot(cols([{:?}]), on_values, {}, cols([{:?}]), {}, true, \"_\".into())",
                on,
                if index.is_empty() {
                    "empty()".to_string()
                } else {
                    format!("cols({})", str_list(index))
                },
                values,
                agg_element_code(*agg)
            )],
            Self::Unpivot {
                index,
                on,
                variable_name,
                value_name,
            } => vec![format!(
                ".unpivot(UnpivotArgsDSL {{ on: Some(cols({})), index: cols({}), variable_name: Some({:?}.into()), value_name: Some({:?}.into()) }})",
                str_list(on),
                str_list(index),
                variable_name,
                value_name
            )],
            Self::Join(plan) => {
                let how = match plan.how {
                    JoinHow::Inner => "JoinType::Inner",
                    JoinHow::Left => "JoinType::Left",
                    JoinHow::Outer => "JoinType::Full",
                };
                let output = plan
                    .output
                    .iter()
                    .map(|o| match o {
                        JoinOutput::Column(c) => format!("col({:?})", c),
                        JoinOutput::CoalescedKey { left, right } => format!(
                            "coalesce(&[col({:?}), col({:?})]).alias({:?})",
                            left, right, left
                        ),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                vec![
                    format!(
                        ".join(right, {}, {}, JoinArgs::new({}).with_coalesce(JoinCoalesce::KeepColumns))",
                        col_list(&plan.left_on),
                        col_list(&plan.right_on),
                        how
                    ),
                    format!(".select([{}])", output),
                ]
            }
            Self::Sample {
                size,
                replace,
                seed,
            } => vec![
                ".collect()?".to_string(),
                sample_call(*size, *replace, *seed),
                ".lazy()".to_string(),
            ],
            Self::Window(plan) => {
                let mut calls = vec![format!(".with_row_index({:?}, None)", ROW_INDEX)];
                let ordered = plan.function.is_ordered();
                if ordered {
                    let mut by = plan.partition_by.clone();
                    by.extend(plan.order_by.iter().cloned());
                    by.push(ROW_INDEX.to_string());
                    let mut desc = vec![false; plan.partition_by.len()];
                    desc.extend(std::iter::repeat(plan.descending).take(plan.order_by.len()));
                    desc.push(false);
                    calls.push(format!(
                        ".sort_by_exprs({}, {})",
                        col_list(&by),
                        sort_options_code(&desc)
                    ));
                }
                calls.extend(window_value_code(plan));
                if ordered {
                    calls.push(format!(
                        ".sort([{:?}], SortMultipleOptions::default())",
                        ROW_INDEX
                    ));
                }
                calls.push(format!(".select({})", col_list(&plan.result_columns())));
                calls
            }
        }
    }

    /// One `let df = ...;` statement for the eager engine.
    pub fn eager_statement(&self) -> String {
        match self {
            Self::SelectColumns(columns) => format!("let df = df.select({})?;", str_list(columns)),
            Self::DropColumns { drop, .. } => format!("let df = df.drop_many({});", str_list(drop)),
            Self::Sort { by, descending } => format!(
                "let df = df.sort({}, {})?;",
                str_list(by),
                sort_options_code(descending)
            ),
            Self::Sample {
                size,
                replace,
                seed,
            } => format!("let df = df{}?;", sample_call(*size, *replace, *seed)),
            other => {
                let mut text = String::from("let df = df.lazy()");
                for call in other.lazy_calls() {
                    text.push_str("\n    ");
                    text.push_str(&call);
                }
                text.push_str("\n    .collect()?;");
                text
            }
        }
    }
}

fn sample_call(size: SampleSize, replace: bool, seed: u64) -> String {
    let n = match size {
        SampleSize::Rows(n) => n.to_string(),
        SampleSize::Fraction(f) => format!("(df.height() as f64 * {:?}).round() as usize", f),
    };
    format!(".sample_n_literal({}, {}, true, Some({}))", n, replace, seed)
}

/// Display source for a frame program.
pub fn render(engine: Engine, steps: &[FrameStep]) -> String {
    let mut lines: Vec<String> = steps.iter().flat_map(FrameStep::preamble).collect();
    match engine {
        Engine::Eager => {
            lines.extend(steps.iter().map(FrameStep::eager_statement));
        }
        _ => {
            let mut chain = String::from("let df = df\n    .lazy()");
            for call in steps.iter().flat_map(FrameStep::lazy_calls) {
                chain.push_str("\n    ");
                chain.push_str(&call);
            }
            chain.push_str("\n    .collect()?;");
            lines.push(chain);
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinaryOp;

    fn region_is_a() -> FrameStep {
        FrameStep::Filter(
            ScalarExpr::column("region")
                .binary(BinaryOp::Eq, ScalarExpr::lit(Literal::Str("A".to_string()))),
        )
    }

    #[test]
    fn test_lazy_render_is_one_chain() {
        let steps = vec![
            region_is_a(),
            FrameStep::SelectColumns(vec!["id".to_string(), "amount".to_string()]),
        ];
        let text = render(Engine::Lazy, &steps);
        assert_eq!(
            text,
            "let df = df\n    .lazy()\n    .filter(col(\"region\").eq(lit(\"A\")))\n    .select([col(\"id\"), col(\"amount\")])\n    .collect()?;"
        );
    }

    #[test]
    fn test_eager_render_uses_native_methods() {
        let steps = vec![
            region_is_a(),
            FrameStep::DropColumns {
                drop: vec!["region".to_string()],
                keep: vec!["id".to_string()],
            },
        ];
        let text = render(Engine::Eager, &steps);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "let df = df.lazy()");
        assert!(text.contains("let df = df.drop_many([\"region\"]);"));
        assert!(!text.contains(".select([col(\"id\")])"));
    }

    #[test]
    fn test_join_render_declares_right_frame() {
        let plan = JoinPlan {
            right: "customers".to_string(),
            how: JoinHow::Left,
            left_on: vec!["id".to_string()],
            right_on: vec!["__right_key_0".to_string()],
            right_columns: vec![
                ("id".to_string(), "__right_key_0".to_string()),
                ("name".to_string(), "name".to_string()),
            ],
            output: vec![
                JoinOutput::Column("id".to_string()),
                JoinOutput::Column("name".to_string()),
            ],
        };
        let text = render(Engine::Lazy, &[FrameStep::Join(plan)]);
        assert!(text.starts_with("let right = related(\"customers\")"));
        assert!(text.contains("JoinType::Left"));
    }

    #[test]
    fn test_sample_size() {
        assert_eq!(SampleSize::Rows(3).rows_for(10), 3);
        assert_eq!(SampleSize::Fraction(0.25).rows_for(10), 3);
        assert_eq!(SampleSize::Fraction(1.0).rows_for(7), 7);
    }

    #[test]
    fn test_window_result_columns() {
        let plan = WindowPlan {
            function: WindowFunc::Lag,
            column: Some("amount".to_string()),
            partition_by: vec![],
            order_by: vec!["id".to_string()],
            descending: false,
            offset: 1,
            output: "amount".to_string(),
            columns: vec!["id".to_string(), "amount".to_string()],
        };
        assert_eq!(plan.result_columns(), vec!["id", "amount"]);
        let appended = WindowPlan {
            output: "amount_lag".to_string(),
            ..plan
        };
        assert_eq!(appended.result_columns(), vec!["id", "amount", "amount_lag"]);
    }
}
