use polars::prelude::*;

use super::frame::{apply_step, run_raw_query};
use super::{collect_lazy, Engine, EngineAdapter, ExecutionInput, ExecutionLimits};
use crate::compile::{Fragment, Program};

/// Builds one plan for the whole program and collects it once, so polars can
/// optimize across steps.
#[derive(Debug, Default)]
pub struct LazyAdapter;

impl EngineAdapter for LazyAdapter {
    fn engine(&self) -> Engine {
        Engine::Lazy
    }

    fn run(
        &self,
        fragment: &Fragment,
        input: &ExecutionInput,
        limits: &ExecutionLimits,
    ) -> PolarsResult<DataFrame> {
        let lf = input.primary.frame().clone().lazy();
        let plan = match &fragment.program {
            Program::Frame(steps) => steps
                .iter()
                .try_fold(lf, |lf, step| apply_step(lf, step, input))?,
            Program::Raw(text) => run_raw_query(lf, text)?,
            Program::Sql(_) => {
                return Err(PolarsError::ComputeError(
                    "the lazy engine cannot run SQL".into(),
                ))
            }
        };
        collect_lazy(plan, limits.polars_streaming)
    }
}
