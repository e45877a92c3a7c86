use polars::prelude::*;

use super::frame::{apply_step, run_raw_query};
use super::{Engine, EngineAdapter, ExecutionInput, ExecutionLimits};
use crate::compile::{FrameStep, Fragment, Program};

/// Runs each step to completion before the next, on `DataFrame` methods
/// where polars has them.
#[derive(Debug, Default)]
pub struct EagerAdapter;

fn run_step(df: DataFrame, step: &FrameStep, input: &ExecutionInput) -> PolarsResult<DataFrame> {
    match step {
        FrameStep::SelectColumns(names) => df.select(names.iter().map(String::as_str)),
        FrameStep::DropColumns { drop, .. } => Ok(df.drop_many(drop.iter().map(String::as_str))),
        FrameStep::Sort { by, descending } => df.sort(
            by.iter().map(String::as_str).collect::<Vec<_>>(),
            SortMultipleOptions::default()
                .with_order_descending_multi(descending.clone())
                .with_nulls_last(true)
                .with_maintain_order(true),
        ),
        FrameStep::Sample {
            size,
            replace,
            seed,
        } => df.sample_n_literal(size.rows_for(df.height()), *replace, true, Some(*seed)),
        other => apply_step(df.lazy(), other, input)?.collect(),
    }
}

impl EngineAdapter for EagerAdapter {
    fn engine(&self) -> Engine {
        Engine::Eager
    }

    fn run(
        &self,
        fragment: &Fragment,
        input: &ExecutionInput,
        _limits: &ExecutionLimits,
    ) -> PolarsResult<DataFrame> {
        let df = input.primary.frame().clone();
        match &fragment.program {
            Program::Frame(steps) => steps
                .iter()
                .try_fold(df, |df, step| run_step(df, step, input)),
            Program::Raw(text) => run_raw_query(df.lazy(), text)?.collect(),
            Program::Sql(_) => Err(PolarsError::ComputeError(
                "the eager engine cannot run SQL".into(),
            )),
        }
    }
}
