mod common;

use polars::prelude::*;
use serde_json::json;
use std::time::Duration;
use wrangle_lib::{AppConfig, ConfigManager, Engine, ErrorKind, Session, SessionOptions};

#[test]
fn test_timeout_leaves_history_unchanged() {
    let mut options = SessionOptions::default();
    options.limits.timeout = Duration::from_millis(1);
    let session = Session::new(options);
    let values: Vec<i64> = (0..5_000_000i64).rev().collect();
    let keys: Vec<f64> = values.iter().map(|v| (*v as f64).sin()).collect();
    session.open("big", df!("x" => values, "k" => keys).unwrap()).unwrap();

    let err = session
        .apply_operation("big", "sort", &json!({"columns": ["k", "x"]}), Engine::Eager)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(err.fragment().is_some());

    let view = session.load_full("big").unwrap();
    assert!(!view.can_undo);
    assert_eq!(view.row_count, 5_000_000);
}

#[test]
fn test_config_file_drives_session() {
    let dir = tempfile::tempdir().unwrap();
    let manager = ConfigManager::with_dir(dir.path().to_path_buf());
    manager.ensure_config_dir().unwrap();
    std::fs::write(
        manager.config_path("config.toml"),
        r#"
[engine]
default_engine = "relational"
preview_rows = 2
full_load_max_rows = 0

[history]
max_entries = 1
"#,
    )
    .unwrap();

    let config = AppConfig::load_from(&manager).unwrap();
    assert_eq!(config.engine.default_engine, Engine::Relational);
    assert_eq!(config.engine.timeout_ms, 30_000);

    let session = common::session_with(SessionOptions::from(&config));
    assert_eq!(session.default_engine(), Engine::Relational);

    let view = session
        .apply_operation("orders", "sort", &json!({"columns": ["amount"]}), session.default_engine())
        .unwrap();
    assert_eq!(view.preview_rows.len(), 2);
    assert_eq!(view.row_count, 3);
    assert!(view.display_code.starts_with("-- "));

    let err = session
        .apply_operation("orders", "sort", &json!({"columns": ["id"]}), Engine::Lazy)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.fields()[0].field, "history");

    // Unlimited full load ignores the preview cap.
    assert_eq!(session.load_full("orders").unwrap().preview_rows.len(), 3);
}

#[test]
fn test_generated_config_loads_as_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let manager = ConfigManager::with_dir(dir.path().join("wrangle"));
    let path = manager.write_default_config(false).unwrap();
    assert!(path.exists());
    assert!(manager.write_default_config(false).is_err());
    assert_eq!(AppConfig::load_from(&manager).unwrap(), AppConfig::default());
}

#[test]
fn test_dataset_lifecycle() {
    let session = common::session();
    assert_eq!(session.list_datasets(), vec!["customers", "events", "orders"]);

    session
        .apply_operation("orders", "filter", &json!({"column": "region", "operator": "==", "value": "A"}), Engine::Lazy)
        .unwrap();
    session.rename_dataset("orders", "sales").unwrap();
    assert_eq!(session.load_full("orders").unwrap_err().kind(), ErrorKind::NotFound);

    let view = session.undo("sales", Engine::Lazy).unwrap();
    assert_eq!(view.dataset_name, "sales");
    assert_eq!(view.row_count, 3);

    let description = session.describe("sales").unwrap();
    assert_eq!(description.row_count, 3);

    assert_eq!(
        session.rename_dataset("sales", "customers").unwrap_err().kind(),
        ErrorKind::InvalidState
    );
    session.delete_dataset("sales").unwrap();
    assert_eq!(session.list_datasets(), vec!["customers", "events"]);
    assert_eq!(session.delete_dataset("sales").unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_merge_reads_current_right_dataset() {
    let session = common::session();
    session
        .apply_operation("customers", "filter", &json!({"column": "name", "operator": "!=", "value": "cy"}), Engine::Eager)
        .unwrap();
    let view = session
        .apply_operation("orders", "merge", &json!({"right": "customers", "on": ["id"]}), Engine::Eager)
        .unwrap();
    assert_eq!(view.row_count, 1);

    let err = session
        .apply_operation("orders", "merge", &json!({"right": "nowhere", "on": ["id"]}), Engine::Eager)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
