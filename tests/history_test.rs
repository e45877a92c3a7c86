mod common;

use serde_json::{json, Value};
use wrangle_lib::registry::supported_engines;
use wrangle_lib::{Engine, ErrorKind, OperationKind, Session};

fn every_kind() -> Vec<(&'static str, &'static str, Value)> {
    vec![
        ("orders", "filter", json!({"column": "region", "operator": "==", "value": "A"})),
        ("orders", "select_columns", json!({"columns": ["id"]})),
        ("orders", "sort", json!({"columns": ["amount"], "ascending": false})),
        ("orders", "rename", json!({"mapping": {"amount": "total"}})),
        ("orders", "drop_columns", json!({"columns": ["region"]})),
        ("orders", "drop_duplicates", json!({"keep": "first"})),
        ("orders", "fillna", json!({"value": 0, "columns": ["amount"]})),
        ("orders", "dropna", json!({"how": "any"})),
        ("orders", "astype", json!({"column": "amount", "dtype": "float"})),
        (
            "orders",
            "group_aggregate",
            json!({"group_by": ["region"], "aggregations": [{"column": "amount", "function": "sum"}]}),
        ),
        ("orders", "pivot", json!({"index": ["id"], "columns": "region", "values": "amount", "aggfunc": "sum"})),
        ("orders", "melt", json!({"id_vars": ["id"], "value_vars": ["amount"]})),
        ("orders", "merge", json!({"right": "customers", "on": ["id"], "how": "inner"})),
        ("orders", "sample", json!({"n": 2, "seed": 1})),
        ("orders", "shuffle", json!({"seed": 3})),
        ("orders", "string_op", json!({"column": "region", "operation": "lower"})),
        ("events", "date_extract", json!({"column": "day", "part": "month"})),
        ("orders", "create_column", json!({"name": "double", "expression": "amount * 2"})),
        (
            "orders",
            "window_function",
            json!({"function": "sum", "column": "amount", "partition_by": ["region"]}),
        ),
        ("orders", "relational_select", json!({"predicate": "amount > 15"})),
        ("orders", "relational_project", json!({"attributes": ["id"]})),
        ("orders", "relational_rename", json!({"mapping": {"id": "order_id"}})),
    ]
}

/// `events.day` holds text until it is cast.
fn prepare(session: &Session, dataset: &str, engine: Engine) {
    if dataset == "events" {
        session
            .apply_operation("events", "astype", &json!({"column": "day", "dtype": "date"}), engine)
            .unwrap();
    }
}

#[test]
fn test_every_kind_is_covered() {
    let covered: Vec<&str> = every_kind().iter().map(|(_, k, _)| *k).collect();
    for kind in OperationKind::ALL {
        assert!(covered.contains(&kind.as_str()), "missing {}", kind.as_str());
    }
}

#[test]
fn test_undo_restores_pre_apply_state_for_every_kind() {
    for (dataset, kind, params) in every_kind() {
        let op_kind: OperationKind = kind.parse().unwrap();
        for engine in supported_engines(op_kind).iter() {
            let session = common::session();
            prepare(&session, dataset, engine);
            let before = session.load_full(dataset).unwrap();

            let applied = session
                .apply_operation(dataset, kind, &params, engine)
                .unwrap_or_else(|e| panic!("{} on {}: {}", kind, engine, e));
            assert!(applied.can_undo);

            let after = session.undo(dataset, engine).unwrap();
            assert_eq!(after.row_count, before.row_count, "{} on {}", kind, engine);
            assert_eq!(session.load_full(dataset).unwrap(), before, "{} on {}", kind, engine);
        }
    }
}

#[test]
fn test_reset_returns_to_origin() {
    let session = common::session();
    let origin = session.load_full("orders").unwrap();
    session
        .apply_operation("orders", "sort", &json!({"columns": ["amount"], "ascending": false}), Engine::Eager)
        .unwrap();
    session
        .apply_operation("orders", "select_columns", &json!({"columns": ["id", "amount"]}), Engine::Eager)
        .unwrap();
    let view = session.reset("orders", Engine::Eager).unwrap();
    assert!(!view.can_undo);
    assert!(!view.can_reset);
    assert_eq!(session.load_full("orders").unwrap(), origin);
    assert_eq!(session.undo("orders", Engine::Eager).unwrap_err().kind(), ErrorKind::InvalidState);
}

#[test]
fn test_orders_filter_then_undo() {
    for engine in Engine::ALL {
        let session = common::session();
        let view = session
            .apply_operation(
                "orders",
                "filter",
                &json!({"column": "region", "operator": "==", "value": "A"}),
                engine,
            )
            .unwrap();
        assert_eq!(view.row_count, 2);
        assert_eq!(
            common::sorted_rows(&view),
            vec![vec![json!(1), json!(10), json!("A")], vec![json!(3), json!(30), json!("A")]]
        );
        assert!(view.can_undo);

        let view = session.undo("orders", engine).unwrap();
        assert_eq!(view.row_count, 3);
        assert!(!view.can_undo);
    }
}

#[test]
fn test_failed_operation_leaves_history_untouched() {
    let session = common::session();
    session
        .apply_operation("orders", "select_columns", &json!({"columns": ["id"]}), Engine::Lazy)
        .unwrap();
    let before = session.load_full("orders").unwrap();

    let err = session
        .apply_operation("orders", "sort", &json!({"columns": ["amount"]}), Engine::Lazy)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = session
        .execute_raw_fragment("orders", "select id where nope > 1", Engine::Lazy)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Execution);
    assert!(err.fragment().is_some());

    assert_eq!(session.load_full("orders").unwrap(), before);
}

#[test]
fn test_replay_reproduces_current_snapshot() {
    for engine in [Engine::Eager, Engine::Lazy] {
        let session = common::session();
        let steps = [
            ("create_column", json!({"name": "double", "expression": "amount * 2"})),
            ("merge", json!({"right": "customers", "on": ["id"], "how": "left"})),
            ("sample", json!({"frac": 1.0, "seed": 11})),
            (
                "window_function",
                json!({"function": "rank", "partition_by": ["region"], "order_by": ["amount"]}),
            ),
        ];
        for (kind, params) in steps {
            session.apply_operation("orders", kind, &params, engine).unwrap();
        }
        session
            .execute_raw_fragment("orders", "select id, double where double > 10", engine)
            .unwrap();

        let report = session.replay("orders", engine).unwrap();
        assert!(report.matches_current, "replay diverged on {}", engine);
        assert_eq!(report.result.row_count, session.load_full("orders").unwrap().row_count);
    }
}

#[test]
fn test_relational_raw_sql_sees_other_datasets() {
    let session = common::session();
    let view = session
        .execute_raw_fragment(
            "orders",
            "SELECT o.id, c.name FROM orders o JOIN customers c ON o.id = c.id ORDER BY o.id",
            Engine::Relational,
        )
        .unwrap();
    assert_eq!(
        view.preview_rows,
        vec![vec![json!(1), json!("ann")], vec![json!(3), json!("cy")]]
    );
    let report = session.replay("orders", Engine::Relational).unwrap();
    assert!(report.matches_current);
}

#[test]
fn test_undo_display_code_is_the_remaining_script() {
    let session = common::session();
    session
        .apply_operation("orders", "filter", &json!({"column": "amount", "operator": ">", "value": 15}), Engine::Lazy)
        .unwrap();
    session
        .apply_operation("orders", "select_columns", &json!({"columns": ["id"]}), Engine::Lazy)
        .unwrap();
    let view = session.undo("orders", Engine::Relational).unwrap();
    assert!(view.display_code.contains("WHERE (\"amount\" > 15);"));
    assert!(!view.display_code.contains("SELECT \"id\""));
}

#[test]
fn test_save_as_is_independent() {
    let session = common::session();
    session
        .apply_operation("orders", "filter", &json!({"column": "region", "operator": "==", "value": "B"}), Engine::Eager)
        .unwrap();
    let saved = session.save_as("orders", "b_orders").unwrap();
    assert_eq!(saved.row_count, 1);
    assert!(!saved.can_undo);

    session.undo("orders", Engine::Eager).unwrap();
    assert_eq!(session.load_full("b_orders").unwrap().row_count, 1);
    assert_eq!(session.load_full("orders").unwrap().row_count, 3);
}
