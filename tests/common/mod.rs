#![allow(dead_code)]

use polars::prelude::*;
use serde_json::Value;
use wrangle_lib::{ResultView, Session, SessionOptions};

/// `orders`: id, amount, region with rows (1,10,A) (2,20,B) (3,30,A).
pub fn orders() -> DataFrame {
    df!(
        "id" => [1i64, 2, 3],
        "amount" => [10i64, 20, 30],
        "region" => ["A", "B", "A"]
    )
    .unwrap()
}

/// `customers.region` shares a name with `orders.region` but never its
/// values, so a join shows which side a column came from.
pub fn customers() -> DataFrame {
    df!(
        "id" => [1i64, 3, 4],
        "name" => ["ann", "cy", "dee"],
        "region" => ["north", "south", "west"]
    )
    .unwrap()
}

/// Dates as text, to be cast with `astype`.
pub fn events() -> DataFrame {
    df!(
        "id" => [1i64, 2, 3],
        "day" => ["2024-01-05", "2024-02-10", "2023-12-31"]
    )
    .unwrap()
}

pub fn session_with(options: SessionOptions) -> Session {
    let session = Session::new(options);
    session.open("orders", orders()).unwrap();
    session.open("customers", customers()).unwrap();
    session.open("events", events()).unwrap();
    session
}

pub fn session() -> Session {
    session_with(SessionOptions::default())
}

pub fn column_names(view: &ResultView) -> Vec<String> {
    view.columns.iter().map(|c| c.name.clone()).collect()
}

/// Preview rows in a stable order, for engines that do not promise one.
pub fn sorted_rows(view: &ResultView) -> Vec<Vec<Value>> {
    let mut rows = view.preview_rows.clone();
    rows.sort_by_key(|r| serde_json::to_string(r).unwrap());
    rows
}
