//! Quantified invariants, boundary behaviors, and plan output.

use common::DbError;
use executor::JoinRow;
use join::JoinTable;
use storage::MemTable;
use testsupport::prelude::*;
use types::Value;

#[test]
fn close_releases_every_underlying_scanner() {
    let (p, p_count) = tracking(p_table());
    let (q, q_count) = tracking(q_table());
    let table = JoinTable::open("p : q", pq_join_schema(), vec![p, q]).unwrap();

    let mut cursor = table
        .new_scanner(no_txn(), Some("p.id == q.pid"), &[])
        .unwrap();
    assert!(cursor.row().is_some());
    assert!(p_count.open() + q_count.open() > 0);

    cursor.close();
    assert_eq!(p_count.open(), 0);
    assert_eq!(q_count.open(), 0);

    // Draining to exhaustion and closing leaks nothing either.
    let cursor = table
        .new_scanner(no_txn(), Some("p.id == q.pid"), &[])
        .unwrap();
    drain(cursor);
    assert_eq!(p_count.open(), 0);
    assert_eq!(q_count.open(), 0);
}

#[test]
fn scanners_are_closed_before_an_error_surfaces() {
    let (p, p_count) = tracking(p_table());
    let (q, q_count) = tracking(q_table());
    let table = JoinTable::open("p :: q", pq_join_schema(), vec![p, q]).unwrap();

    // The disjunct over p alone forces a remainder at q; the membership test
    // then fails at evaluation time because ?1 is not an array.
    let result = table.new_scanner(
        no_txn(),
        Some("q.pid in ?1 || p.id == ?2"),
        &[Value::Int(1), Value::Int(9)],
    );
    assert!(matches!(result, Err(DbError::Predicate(_))));
    assert_eq!(p_count.open(), 0);
    assert_eq!(q_count.open(), 0);
}

#[test]
fn false_level_filter_never_opens_that_scanner() {
    let (q, q_count) = tracking(q_table());
    let table = JoinTable::open("p :: q", pq_join_schema(), vec![p_table(), q]).unwrap();

    let rows = drain(table.new_scanner(no_txn(), Some("q == null"), &[]).unwrap());
    assert!(rows.is_empty());
    assert_eq!(q_count.open(), 0);
}

#[test]
fn a_false_residual_yields_nothing() {
    // No level can consume a constant, so it survives as the residual and
    // rejects every candidate row.
    let table = open_pq("p : q");
    let rows = drain(table.new_scanner(no_txn(), Some("false"), &[]).unwrap());
    assert!(rows.is_empty());
}

#[test]
fn inner_join_rows_have_no_null_slots() {
    let table = open_pq("p : q");
    for row in drain(table.new_scanner(no_txn(), Some("p.id == q.pid"), &[]).unwrap()) {
        assert!(row.row("p").is_some());
        assert!(row.row("q").is_some());
    }
}

#[test]
fn left_outer_pads_each_unmatched_tuple_exactly_once() {
    let table = open_pq("p >: q");
    let rows = drain(
        table
            .new_scanner(no_txn(), Some("p.id == q.pid || q == null"), &[])
            .unwrap(),
    );
    let padded: Vec<_> = rows.iter().filter(|r| r.row("q").is_none()).collect();
    assert_eq!(padded.len(), 1);
    assert_eq!(
        padded[0].row("p").unwrap().values[0],
        Value::Int(2)
    );
}

#[test]
fn reordering_preserves_the_row_multiset() {
    let fixed = open_pq("p :: q");
    let reorderable = open_pq("p : q");
    let query = Some("p.id == q.pid && q.tag != ?1");
    let args = [Value::Text("y".into())];

    let a: Vec<_> = drain(fixed.new_scanner(no_txn(), query, &args).unwrap())
        .iter()
        .map(pq_key)
        .collect();
    let b: Vec<_> = drain(reorderable.new_scanner(no_txn(), query, &args).unwrap())
        .iter()
        .map(pq_key)
        .collect();
    assert_same_multiset(a, b);
}

#[test]
fn spec_text_round_trips_canonically() {
    let table = open_pq("p:q");
    assert_eq!(table.spec_text(), "p : q");

    let again = open_pq(table.spec_text());
    assert_eq!(again.spec_text(), table.spec_text());
}

#[test]
fn empty_specs_yield_no_rows_on_the_first_step() {
    // Anti join against a non-empty right side is statically empty.
    let table = open_pq("p > q");
    assert!(table.is_empty().unwrap());
    let cursor = table.new_scanner(no_txn(), None, &[]).unwrap();
    assert!(cursor.row().is_none());

    // And an inner join against an empty side.
    let empty_q = MemTable::new("q", q_schema());
    let table = open_pq_with("p : q", p_table(), std::sync::Arc::new(empty_q));
    assert!(table.is_empty().unwrap());
    let cursor = table.new_scanner(no_txn(), None, &[]).unwrap();
    assert!(cursor.row().is_none());
}

#[test]
fn equivalent_query_texts_share_one_canonical_form() {
    let table = open_pq("p : q");
    let loose = drain(
        table
            .new_scanner(no_txn(), Some("p.id==q.pid"), &[])
            .unwrap(),
    );
    let canonical = drain(
        table
            .new_scanner(no_txn(), Some("p.id == q.pid"), &[])
            .unwrap(),
    );
    assert_eq!(loose.len(), canonical.len());
}

#[test]
fn joins_are_read_only() {
    let table = open_pq("p : q");
    let cursor = table.new_scanner(no_txn(), None, &[]).unwrap();
    let row = cursor.row().unwrap().clone();
    let txn = no_txn();

    assert!(matches!(
        table.store(txn.as_ref(), &row),
        Err(DbError::Unmodifiable)
    ));
    assert!(matches!(
        table.delete(txn.as_ref(), &row),
        Err(DbError::Unmodifiable)
    ));
    assert!(matches!(
        table.exists(txn.as_ref(), &row),
        Err(DbError::Unmodifiable)
    ));
    let mut buffer = row.clone();
    assert!(matches!(
        table.load(txn.as_ref(), &mut buffer),
        Err(DbError::Unmodifiable)
    ));
}

#[test]
fn stepping_with_a_fresh_row_resynchronizes_slots() {
    let table = open_pq("p :: q");
    let mut cursor = table
        .new_scanner(no_txn(), Some("p.id == q.pid"), &[])
        .unwrap();
    let first = cursor.row().unwrap();
    assert_eq!(pq_key(first), pq(Some(1), Some((1, "x"))));

    let blank = JoinRow::new(first.layout().clone());
    let next = cursor.step_with(blank).unwrap().unwrap();
    assert_eq!(pq_key(next), pq(Some(1), Some((1, "y"))));
}

#[test]
fn too_few_arguments_is_fatal_to_the_scanner_call() {
    let table = open_pq("p : q");
    let err = table
        .new_scanner(no_txn(), Some("q.tag == ?2"), &[Value::Int(1)])
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::TooFewArguments {
            required: 2,
            supplied: 1
        }
    ));
}

#[test]
fn full_outer_plan_is_a_disjoint_union_of_two_loop_joins() {
    let table = open_pq("p >:< q");
    let rendered = table
        .query_plan(Some("p.id == q.pid"))
        .unwrap()
        .render();
    insta::assert_snapshot!(rendered, @r"
    - disjoint union
      - nested loops join
        - level
          assignments: ?1 = p.id
          - full scan over primary key: p
            key columns: id
        - level
          join type: left outer
          - filter: pid == ?1
            - full scan over primary key: q
              key columns: pid, tag
      - nested loops join
        - level
          assignments: ?1 = q.pid
          - full scan over primary key: q
            key columns: pid, tag
        - level
          join type: left anti
          - exists
            - load one from primary key: p
              key columns: id
              filter: id == ?1
    ");
}

#[test]
fn anti_join_plan_uses_the_exists_probe() {
    let table = open_pq("p > q");
    let rendered = table
        .query_plan(Some("p.id == q.pid"))
        .unwrap()
        .render();
    insta::assert_snapshot!(rendered, @r"
    - nested loops join
      - level
        assignments: ?1 = p.id
        - full scan over primary key: p
          key columns: id
      - level
        join type: left anti
        - exists
          - filter: pid == ?1
            - full scan over primary key: q
              key columns: pid, tag
    ");
}
