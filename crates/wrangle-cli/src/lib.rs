//! Shared CLI definitions for wrangle.
//!
//! Used by the main application and by the build script (manpage).

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Engine that runs the operations.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum EngineArg {
    /// Polars DataFrame, one step at a time
    Eager,
    /// Polars LazyFrame, one optimized plan
    Lazy,
    /// SQL through polars-sql
    Relational,
}

impl EngineArg {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eager => "eager",
            Self::Lazy => "lazy",
            Self::Relational => "relational",
        }
    }
}

/// Command-line arguments for wrangle
#[derive(Clone, Parser, Debug)]
#[command(
    name = "wrangle",
    version,
    about = "Apply form-style data transformations on eager, lazy or SQL engines",
    long_about = "Loads CSV files as named datasets (named after the file stem), applies a JSON \
operation script or a relational chain script, and prints a preview of each result together \
with the code the chosen engine ran."
)]
pub struct Args {
    /// CSV file(s) to load. The first one is the dataset the script transforms
    /// (not required with --generate-config)
    #[arg(required_unless_present = "generate_config", num_args = 1.., value_name = "PATH")]
    pub paths: Vec<PathBuf>,

    /// Engine to run on (default: engine.default_engine from the config file)
    #[arg(long = "engine", value_enum)]
    pub engine: Option<EngineArg>,

    /// JSON file with a list of {"kind": ..., "parameters": ...} operations,
    /// or {"raw": "..."} entries holding engine code
    #[arg(long = "ops", value_name = "FILE", conflicts_with = "chain")]
    pub ops: Option<PathBuf>,

    /// JSON file with a list of {"operator": ..., "parameters": ...} chain steps
    /// (select, project, rename), committed at the end
    #[arg(long = "chain", value_name = "FILE")]
    pub chain: Option<PathBuf>,

    /// Save the final result as a new dataset with this name (chain commits
    /// default to "<dataset>_chain")
    #[arg(long = "save-as", value_name = "NAME")]
    pub save_as: Option<String>,

    /// Generate default configuration file at ~/.config/wrangle/config.toml
    #[arg(long = "generate-config", action)]
    pub generate_config: bool,

    /// Force overwrite existing config file when using --generate-config
    #[arg(long = "force", requires = "generate_config", action)]
    pub force: bool,

    /// Rows shown per preview (overrides engine.preview_rows)
    #[arg(long = "preview-rows", value_name = "N")]
    pub preview_rows: Option<usize>,

    /// Execution timeout in milliseconds (overrides engine.timeout_ms)
    #[arg(long = "timeout-ms", value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_ops_run() {
        let args = Args::try_parse_from([
            "wrangle",
            "orders.csv",
            "customers.csv",
            "--engine",
            "relational",
            "--ops",
            "ops.json",
        ])
        .unwrap();
        assert_eq!(args.paths.len(), 2);
        assert_eq!(args.engine, Some(EngineArg::Relational));
        assert_eq!(args.engine.map(EngineArg::as_str), Some("relational"));
    }

    #[test]
    fn test_paths_optional_only_for_generate_config() {
        assert!(Args::try_parse_from(["wrangle"]).is_err());
        assert!(Args::try_parse_from(["wrangle", "--generate-config", "--force"]).is_ok());
        assert!(Args::try_parse_from(["wrangle", "a.csv", "--force"]).is_err());
        assert!(Args::try_parse_from(["wrangle", "a.csv", "--ops", "o.json", "--chain", "c.json"]).is_err());
    }
}
