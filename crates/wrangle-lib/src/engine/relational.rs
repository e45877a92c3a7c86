use polars::prelude::*;

use super::{collect_lazy, Engine, EngineAdapter, ExecutionInput, ExecutionLimits};
use crate::compile::{Fragment, Program};

/// Runs SQL through polars-sql. The primary dataset is registered under its
/// own name and as `df`; related datasets under theirs.
#[derive(Debug, Default)]
pub struct RelationalAdapter;

#[cfg(feature = "sql")]
fn run_sql(sql: &str, input: &ExecutionInput, limits: &ExecutionLimits) -> PolarsResult<DataFrame> {
    use polars_sql::SQLContext;

    let mut ctx = SQLContext::new();
    let primary = input.primary.frame().clone().lazy();
    ctx.register(input.primary.name(), primary.clone());
    ctx.register("df", primary);
    for (name, snapshot) in &input.related {
        ctx.register(name, snapshot.frame().clone().lazy());
    }
    collect_lazy(ctx.execute(sql)?, limits.polars_streaming)
}

#[cfg(not(feature = "sql"))]
fn run_sql(_sql: &str, _input: &ExecutionInput, _limits: &ExecutionLimits) -> PolarsResult<DataFrame> {
    Err(PolarsError::ComputeError(
        "SQL support is not enabled. Rebuild with the 'sql' feature.".into(),
    ))
}

impl EngineAdapter for RelationalAdapter {
    fn engine(&self) -> Engine {
        Engine::Relational
    }

    fn run(
        &self,
        fragment: &Fragment,
        input: &ExecutionInput,
        limits: &ExecutionLimits,
    ) -> PolarsResult<DataFrame> {
        match &fragment.program {
            Program::Sql(select) => run_sql(&select.render(), input, limits),
            Program::Raw(text) => {
                let text = text.trim().trim_end_matches(';');
                if text.is_empty() {
                    return Ok(input.primary.frame().clone());
                }
                run_sql(text, input, limits)
            }
            Program::Frame(_) => Err(PolarsError::ComputeError(
                "the relational engine only runs SQL".into(),
            )),
        }
    }
}

#[cfg(all(test, feature = "sql"))]
mod tests {
    use super::*;
    use crate::snapshot::Snapshot;

    #[test]
    fn test_primary_is_registered_twice() {
        let df = df!("id" => [1i64, 2, 3]).unwrap();
        let input = ExecutionInput::new(Snapshot::new("orders", df).unwrap());
        let limits = ExecutionLimits::default();
        let by_name = RelationalAdapter
            .run(&Fragment::raw(Engine::Relational, "SELECT * FROM orders WHERE id > 1"), &input, &limits)
            .unwrap();
        let by_alias = RelationalAdapter
            .run(&Fragment::raw(Engine::Relational, "SELECT * FROM df WHERE id > 1;"), &input, &limits)
            .unwrap();
        assert_eq!(by_name.height(), 2);
        assert!(by_name.equals(&by_alias));
    }
}
