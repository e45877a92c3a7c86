//! Turns polars failures into messages a form user can act on.
//!
//! The three engines all fail through `PolarsError`, so matching on its
//! variants keeps the wording identical whichever engine ran the fragment.

use polars::prelude::PolarsError;

/// Message for an engine failure. Nested context errors are flattened into
/// `outer: inner`.
pub fn user_message_from_polars(err: &PolarsError) -> String {
    match err {
        PolarsError::ColumnNotFound(name) => format!(
            "Column {} does not exist at this step; an earlier step may have dropped or renamed it",
            name
        ),
        PolarsError::Duplicate(name) => {
            format!("The result would contain column {} twice; rename one side first", name)
        }
        PolarsError::SchemaMismatch(detail) => format!("Incompatible column types: {}", first_line(detail)),
        PolarsError::InvalidOperation(detail) => {
            format!("Not valid for these column types: {}", first_line(detail))
        }
        PolarsError::ShapeMismatch(detail) => format!("Row counts do not line up: {}", first_line(detail)),
        PolarsError::NoData(detail) => format!("Nothing to compute: {}", first_line(detail)),
        PolarsError::OutOfBounds(detail) => format!("Out of range: {}", first_line(detail)),
        PolarsError::SchemaFieldNotFound(name) => format!("Field {} is missing from the schema", name),
        PolarsError::SQLInterface(detail) | PolarsError::SQLSyntax(detail) => sql_message(detail),
        PolarsError::ComputeError(detail) => compute_message(detail),
        PolarsError::Context { error, msg } => format!("{}: {}", msg, user_message_from_polars(error)),
        #[allow(unreachable_patterns)]
        other => first_line(&other.to_string()).to_string(),
    }
}

/// Tables in SQL fragments are dataset names, which is the usual cause of a
/// missing relation.
fn sql_message(detail: &str) -> String {
    let line = first_line(detail);
    if line.to_lowercase().contains("relation") || line.to_lowercase().contains("table") {
        format!("{} (datasets are queried by their session name)", line)
    } else {
        format!("SQL error: {}", line)
    }
}

fn compute_message(detail: &str) -> String {
    let lower = detail.to_lowercase();
    if lower.contains("duplicate") && (lower.contains("output name") || lower.contains("projection")) {
        let name = detail.split('\'').nth(1).unwrap_or("column");
        return format!("The result would contain column '{}' twice; rename one side first", name);
    }
    if lower.contains("conversion from") && lower.contains("failed") {
        return format!("Some values cannot be cast: {}", first_line(detail));
    }
    first_line(detail).to_string()
}

/// Polars appends the resolved plan after a blank line; only the headline is
/// useful to a form user.
fn first_line(detail: &str) -> &str {
    detail.lines().next().map(str::trim).unwrap_or(detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_points_at_earlier_steps() {
        let msg = user_message_from_polars(&PolarsError::ColumnNotFound("amount".into()));
        assert!(msg.contains("amount"));
        assert!(msg.contains("earlier step"));
    }

    #[test]
    fn test_duplicate_output_name_is_extracted() {
        let err = PolarsError::ComputeError(
            "projections contained duplicate output name 'x'. Try renaming with .alias(\"name\")".into(),
        );
        let msg = user_message_from_polars(&err);
        assert!(msg.contains("'x'"));
        assert!(!msg.contains(".alias("));
    }

    #[test]
    fn test_plan_dump_is_dropped() {
        let err = PolarsError::ComputeError("bad input\n\nResolved plan until failure:\n  FILTER".into());
        assert_eq!(user_message_from_polars(&err), "bad input");
    }

    #[test]
    fn test_sql_relation_hint() {
        let err = PolarsError::SQLInterface("relation 'nowhere' was not found".into());
        assert!(user_message_from_polars(&err).contains("session name"));
        let err = PolarsError::SQLSyntax("expected an expression".into());
        assert_eq!(user_message_from_polars(&err), "SQL error: expected an expression");
    }
}
