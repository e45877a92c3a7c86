use clap::Parser;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use polars::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use wrangle_cli::{Args, EngineArg};
use wrangle_lib::{logging, AppConfig, ConfigManager, Engine, ResultView, Session, SessionOptions, APP_NAME};

/// One entry of an `--ops` script.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptEntry {
    Raw {
        raw: String,
    },
    Operation {
        kind: String,
        #[serde(default)]
        parameters: Value,
    },
}

/// One entry of a `--chain` script.
#[derive(Debug, Deserialize)]
struct ChainEntry {
    operator: String,
    #[serde(default)]
    parameters: Value,
}

fn engine_of(arg: EngineArg) -> Engine {
    match arg {
        EngineArg::Eager => Engine::Eager,
        EngineArg::Lazy => Engine::Lazy,
        EngineArg::Relational => Engine::Relational,
    }
}

fn load_csv(path: &Path) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .map_parse_options(|opts| opts.with_try_parse_dates(true))
        .try_into_reader_with_file_path(Some(path.into()))?
        .finish()
        .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    Ok(df)
}

fn dataset_name(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| eyre!("Cannot derive a dataset name from {}", path.display()))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).wrap_err_with(|| format!("Failed to parse {}", path.display()))
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn print_view(title: &str, view: &ResultView) {
    println!("== {} [{}] ==", title, view.dataset_name);
    let header: Vec<String> = view
        .columns
        .iter()
        .map(|c| format!("{} ({})", c.name, c.semantic_type))
        .collect();
    println!("{}", header.join("\t"));
    for row in &view.preview_rows {
        println!("{}", row.iter().map(cell).collect::<Vec<_>>().join("\t"));
    }
    if view.row_count > view.preview_rows.len() {
        println!("... {} rows total", view.row_count);
    } else {
        println!("{} rows", view.row_count);
    }
    if !view.display_code.trim().is_empty() {
        println!("--\n{}", view.display_code.trim_end());
    }
    println!();
}

fn run_ops(session: &Session, dataset: &str, engine: Engine, path: &Path) -> Result<()> {
    let entries: Vec<ScriptEntry> = read_json(path)?;
    for (i, entry) in entries.into_iter().enumerate() {
        let (title, view) = match entry {
            ScriptEntry::Raw { raw } => (
                format!("step {}: raw", i + 1),
                session.execute_raw_fragment(dataset, &raw, engine)?,
            ),
            ScriptEntry::Operation { kind, parameters } => (
                format!("step {}: {}", i + 1, kind),
                session.apply_operation(dataset, &kind, &parameters, engine)?,
            ),
        };
        print_view(&title, &view);
    }
    Ok(())
}

fn run_chain(session: &Session, dataset: &str, path: &Path, save_as: Option<&str>) -> Result<()> {
    let entries: Vec<ChainEntry> = read_json(path)?;
    let mut composed: Option<String> = None;
    for (i, entry) in entries.iter().enumerate() {
        let view = session.preview_chain_step(&entry.operator, &entry.parameters, composed.as_deref(), dataset)?;
        print_view(&format!("chain step {}: {}", i + 1, entry.operator), &view);
        composed = view.composed_query;
    }
    let Some(query) = composed else {
        return Err(eyre!("{} has no chain steps", path.display()));
    };
    let new_name = save_as.map(str::to_string).unwrap_or_else(|| format!("{}_chain", dataset));
    let view = session.commit_chain(&query, &new_name, &[dataset.to_string()])?;
    print_view("chain committed", &view);
    Ok(())
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    if args.generate_config {
        let path = ConfigManager::new(APP_NAME)?.write_default_config(args.force)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let mut config = AppConfig::load(APP_NAME)?;
    if let Some(n) = args.preview_rows {
        config.engine.preview_rows = n;
    }
    if let Some(ms) = args.timeout_ms {
        config.engine.timeout_ms = ms;
    }
    config.validate()?;
    logging::init(&config.logging)?;

    let session = Session::new(SessionOptions::from(&config));
    let engine = args.engine.map(engine_of).unwrap_or(config.engine.default_engine);

    let mut names = Vec::new();
    for path in &args.paths {
        let name = dataset_name(path)?;
        let view = session.open(&name, load_csv(path)?)?;
        print_view("loaded", &view);
        names.push(name);
    }
    let Some(primary) = names.first() else {
        return Err(eyre!("No input files given"));
    };

    if let Some(chain) = &args.chain {
        return run_chain(&session, primary, chain, args.save_as.as_deref());
    }
    if let Some(ops) = &args.ops {
        run_ops(&session, primary, engine, ops)?;
        if let Some(new_name) = &args.save_as {
            print_view("saved", &session.save_as(primary, new_name)?);
        }
    }
    Ok(())
}
