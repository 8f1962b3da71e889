//! Cursor draining and multiset assertion helpers.

use common::pretty::{format_row, render_rows};
use executor::JoinRow;
use join::JoinCursor;
use types::Value;

/// Drain a cursor into owned rows, then close it.
pub fn drain(mut cursor: JoinCursor) -> Vec<JoinRow> {
    let mut rows = Vec::new();
    while let Some(row) = cursor.row() {
        rows.push(row.clone());
        cursor.step().unwrap();
    }
    cursor.close();
    rows
}

/// Project a joined P/Q row to `(p.id, (q.pid, q.tag))` with nulls as `None`.
pub fn pq_key(row: &JoinRow) -> (Option<i64>, Option<(i64, String)>) {
    let p = row.row("p").map(|r| match &r.values[0] {
        Value::Int(id) => *id,
        other => panic!("unexpected p.id {other:?}"),
    });
    let q = row.row("q").map(|r| match (&r.values[0], &r.values[1]) {
        (Value::Int(pid), Value::Text(tag)) => (*pid, tag.clone()),
        other => panic!("unexpected q row {other:?}"),
    });
    (p, q)
}

/// Compare two row sets as multisets, ignoring production order.
#[track_caller]
pub fn assert_same_multiset(
    mut actual: Vec<(Option<i64>, Option<(i64, String)>)>,
    mut expected: Vec<(Option<i64>, Option<(i64, String)>)>,
) {
    actual.sort();
    expected.sort();
    pretty_assertions::assert_eq!(actual, expected);
}

/// Project and compare a cursor's output against an expected multiset.
#[track_caller]
pub fn assert_pq_rows(
    cursor: JoinCursor,
    expected: Vec<(Option<i64>, Option<(i64, String)>)>,
) {
    let actual = drain(cursor).iter().map(pq_key).collect();
    assert_same_multiset(actual, expected);
}

/// Shorthand for an expected row key.
pub fn pq(p: Option<i64>, q: Option<(i64, &str)>) -> (Option<i64>, Option<(i64, String)>) {
    (p, q.map(|(pid, tag)| (pid, tag.to_string())))
}

/// Render joined rows as a human-readable table, one column per source.
pub fn render_join_rows(rows: &[JoinRow]) -> String {
    let headers: Vec<&str> = match rows.first() {
        Some(row) => row.layout().slots().iter().map(|s| s.name.as_str()).collect(),
        None => return "<empty>".into(),
    };
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|name| match row.row(name) {
                    Some(bound) => format_row(bound),
                    None => "null".into(),
                })
                .collect()
        })
        .collect();
    render_rows(&headers, &cells)
}
