mod common;

use polars::prelude::*;
use serde_json::{json, Value};
use wrangle_lib::{Engine, ErrorKind, ResultView};

/// Rows projected onto `order` by column name, then sorted.
fn rows_by(view: &ResultView, order: &[&str]) -> Vec<Vec<Value>> {
    let names = common::column_names(view);
    let positions: Vec<usize> = order
        .iter()
        .map(|c| names.iter().position(|n| n == c).unwrap_or_else(|| panic!("no column {}", c)))
        .collect();
    let mut rows: Vec<Vec<Value>> = view
        .preview_rows
        .iter()
        .map(|row| positions.iter().map(|&i| row[i].clone()).collect())
        .collect();
    rows.sort_by_key(|r| serde_json::to_string(r).unwrap());
    rows
}

fn on_every_engine(kind: &str, params: Value) -> Vec<(Engine, ResultView)> {
    Engine::ALL
        .into_iter()
        .map(|engine| {
            let session = common::session();
            let view = session
                .apply_operation("orders", kind, &params, engine)
                .unwrap_or_else(|e| panic!("{} on {}: {}", kind, engine, e));
            (engine, view)
        })
        .collect()
}

#[test]
fn test_filter_agrees() {
    let views = on_every_engine("filter", json!({"column": "amount", "operator": ">", "value": 15}));
    for (engine, view) in &views {
        assert_eq!(view.row_count, 2, "{}", engine);
        assert_eq!(
            rows_by(view, &["id", "amount"]),
            vec![vec![json!(2), json!(20)], vec![json!(3), json!(30)]],
            "{}",
            engine
        );
    }
}

#[test]
fn test_empty_membership_list_agrees() {
    for (operator, rows) in [("isin", 0), ("notin", 3)] {
        let views = on_every_engine("filter", json!({"column": "region", "operator": operator, "value": []}));
        for (engine, view) in &views {
            assert_eq!(view.row_count, rows, "{} on {}", operator, engine);
        }
    }
}

#[test]
fn test_group_aggregate_agrees() {
    let views = on_every_engine(
        "group_aggregate",
        json!({"group_by": ["region"], "aggregations": [{"column": "amount", "function": "sum"}]}),
    );
    for (engine, view) in &views {
        assert_eq!(
            rows_by(view, &["region", "amount_sum"]),
            vec![vec![json!("A"), json!(40)], vec![json!("B"), json!(20)]],
            "{}",
            engine
        );
    }
}

#[test]
fn test_sort_order_agrees() {
    let views = on_every_engine("sort", json!({"columns": ["amount"], "ascending": false}));
    for (engine, view) in &views {
        let amounts: Vec<Value> = view.preview_rows.iter().map(|r| r[1].clone()).collect();
        assert_eq!(amounts, vec![json!(30), json!(20), json!(10)], "{}", engine);
    }
}

#[test]
fn test_left_join_agrees() {
    let views = on_every_engine("merge", json!({"right": "customers", "on": ["id"], "how": "left"}));
    for (engine, view) in &views {
        let mut names = common::column_names(view);
        names.sort();
        assert_eq!(names, vec!["amount", "id", "name", "region", "region_right"], "{}", engine);
        assert_eq!(
            rows_by(view, &["id", "name", "region_right"]),
            vec![
                vec![json!(1), json!("ann"), json!("north")],
                vec![json!(2), Value::Null, Value::Null],
                vec![json!(3), json!("cy"), json!("south")],
            ],
            "{}",
            engine
        );
    }
}

#[test]
fn test_colliding_columns_keep_their_side() {
    for engine in Engine::ALL {
        let session = common::session();
        session
            .open("codes", df!("code" => [10i64, 30], "id" => [100i64, 300]).unwrap())
            .unwrap();
        let view = session
            .apply_operation(
                "orders",
                "merge",
                &json!({"right": "codes", "left_on": ["amount"], "right_on": ["code"], "how": "inner"}),
                engine,
            )
            .unwrap_or_else(|e| panic!("merge on {}: {}", engine, e));
        assert_eq!(
            rows_by(&view, &["id", "region", "code", "id_right"]),
            vec![
                vec![json!(1), json!("A"), json!(10), json!(100)],
                vec![json!(3), json!("A"), json!(30), json!(300)],
            ],
            "{}",
            engine
        );

        let view = session
            .apply_operation("orders", "merge", &json!({"right": "customers", "on": ["id"]}), engine)
            .unwrap();
        assert_eq!(
            rows_by(&view, &["id", "region", "region_right"]),
            vec![
                vec![json!(1), json!("A"), json!("north")],
                vec![json!(3), json!("A"), json!("south")],
            ],
            "{}",
            engine
        );
    }
}

#[test]
fn test_display_code_matches_engine() {
    for (engine, view) in on_every_engine("select_columns", json!({"columns": ["id"]})) {
        match engine {
            Engine::Relational => assert!(view.display_code.contains("SELECT \"id\" FROM \"orders\"")),
            Engine::Eager | Engine::Lazy => {
                assert!(view.display_code.starts_with("use polars::prelude::*;"))
            }
        }
    }
}

#[test]
fn test_unsupported_pairs_are_rejected_up_front() {
    let session = common::session();
    let err = session
        .apply_operation(
            "orders",
            "pivot",
            &json!({"index": ["id"], "columns": "region", "values": "amount"}),
            Engine::Relational,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedCombination);

    let err = session
        .apply_operation("orders", "merge", &json!({"right": "customers", "on": ["id"], "how": "outer"}), Engine::Relational)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compile);

    let err = session
        .apply_operation(
            "orders",
            "window_function",
            &json!({"function": "row_number", "partition_by": ["region"], "order_by": ["amount"]}),
            Engine::Relational,
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compile);

    assert!(!session.load_full("orders").unwrap().can_undo);
}
