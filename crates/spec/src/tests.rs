use super::*;
use catalog::{ColumnInfo, JoinColumn, JoinSchema, RowSchema};
use pretty_assertions::assert_eq;
use storage::MemTable;
use types::{Value, ValueType};

fn row_schema() -> Arc<RowSchema> {
    Arc::new(
        RowSchema::new(vec![ColumnInfo::new("id", ValueType::Int)], &["id"]).unwrap(),
    )
}

fn join_schema(names: &[&str]) -> Arc<JoinSchema> {
    let schema = row_schema();
    Arc::new(
        JoinSchema::new(
            names
                .iter()
                .map(|n| JoinColumn::new(n, schema.clone()))
                .collect(),
        )
        .unwrap(),
    )
}

fn tables(count: usize) -> Vec<Arc<dyn Table>> {
    (0..count)
        .map(|i| Arc::new(MemTable::new(&format!("t{i}"), row_schema())) as Arc<dyn Table>)
        .collect()
}

fn parse(text: &str, names: &[&str]) -> JoinSpec {
    JoinSpec::parse(text, join_schema(names), &tables(names.len())).unwrap()
}

#[test]
fn parses_the_reference_example() {
    let spec = parse("a : b >: (c : d)", &["a", "b", "c", "d"]);
    match spec.root() {
        SpecNode::Join(op) => {
            assert_eq!(op.ty, JoinType::LeftOuter);
            assert!(matches!(&op.left, SpecNode::InnerJoins(children) if children.len() == 2));
            assert!(matches!(&op.right, SpecNode::InnerJoins(children) if children.len() == 2));
        }
        other => panic!("expected join, got {other:?}"),
    }
    assert_eq!(spec.to_string(), "a : b >: (c : d)");
}

#[test]
fn inner_chains_collapse_into_one_group() {
    let spec = parse("a : b : c", &["a", "b", "c"]);
    match spec.root() {
        SpecNode::InnerJoins(children) => assert_eq!(children.len(), 3),
        other => panic!("expected inner group, got {other:?}"),
    }
}

#[test]
fn straight_joins_stay_binary() {
    let spec = parse("a :: b :: c", &["a", "b", "c"]);
    match spec.root() {
        SpecNode::Join(op) => {
            assert_eq!(op.ty, JoinType::Straight);
            assert!(matches!(&op.left, SpecNode::Join(inner) if inner.ty == JoinType::Straight));
        }
        other => panic!("expected straight join, got {other:?}"),
    }
}

#[test]
fn full_joins_get_ordinal_names() {
    let spec = parse("(a >:< b) : (c >< d)", &["a", "b", "c", "d"]);
    let sources = spec.root().sources();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].name(), "fj0");
    assert_eq!(sources[1].name(), "fj1");
}

#[test]
fn column_iteration_is_in_order() {
    let spec = parse("a : b >: (c >:< d)", &["a", "b", "c", "d"]);
    let names: Vec<_> = spec.root().columns().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c", "d"]);
}

#[test]
fn rejects_duplicate_columns() {
    let err = JoinSpec::parse("a : a", join_schema(&["a", "b"]), &tables(2)).unwrap_err();
    assert!(matches!(err, common::DbError::DuplicateColumn(_)));
}

#[test]
fn rejects_unknown_columns() {
    let err = JoinSpec::parse("a : x", join_schema(&["a", "b"]), &tables(2)).unwrap_err();
    assert!(matches!(err, common::DbError::UnknownColumn(_)));
}

#[test]
fn rejects_syntax_problems() {
    for bad in ["a :", "a : b)", "(a : b", "a @ b", ": a", "a b"] {
        let err = JoinSpec::parse(bad, join_schema(&["a", "b"]), &tables(2)).unwrap_err();
        assert!(matches!(err, common::DbError::Syntax(_)), "{bad}");
    }
}

#[test]
fn rejects_handle_count_mismatch() {
    let err = JoinSpec::parse("a : b", join_schema(&["a", "b"]), &tables(1)).unwrap_err();
    assert!(matches!(err, common::DbError::TypeMismatch(_)));
    let err = JoinSpec::parse("a : b", join_schema(&["a", "b"]), &tables(3)).unwrap_err();
    assert!(matches!(err, common::DbError::TypeMismatch(_)));
}

#[test]
fn rejects_handles_of_the_wrong_row_type() {
    let other_schema = Arc::new(
        RowSchema::new(vec![ColumnInfo::new("key", ValueType::Text)], &["key"]).unwrap(),
    );
    let handles: Vec<Arc<dyn Table>> = vec![
        Arc::new(MemTable::new("t0", row_schema())),
        Arc::new(MemTable::new("t1", other_schema)),
    ];
    let err = JoinSpec::parse("a : b", join_schema(&["a", "b"]), &handles).unwrap_err();
    assert!(matches!(err, common::DbError::TypeMismatch(_)));
}

#[test]
fn to_left_join_swaps_right_variants() {
    let spec = parse("a :< b", &["a", "b"]);
    let normalized = spec.root().clone().to_left_join();
    match &normalized {
        SpecNode::Join(op) => {
            assert_eq!(op.ty, JoinType::LeftOuter);
            assert!(matches!(&op.left, SpecNode::Column(c) if c.name == "b"));
            assert!(matches!(&op.right, SpecNode::Column(c) if c.name == "a"));
        }
        other => panic!("expected join, got {other:?}"),
    }

    // Unaffected trees come back structurally identical.
    let spec = parse("a >: b", &["a", "b"]);
    let normalized = spec.root().clone().to_left_join();
    assert!(matches!(&normalized, SpecNode::Join(op) if op.ty == JoinType::LeftOuter));
}

#[test]
fn split_full_join_produces_outer_and_anti_halves() {
    let spec = parse("a >:< b", &["a", "b"]);
    let SpecNode::FullJoin(fj) = spec.root() else {
        panic!("expected full join");
    };
    let (first, second) = try_split_full_join(&fj.op).unwrap();
    assert_eq!(first.ty, JoinType::LeftOuter);
    assert_eq!(second.ty, JoinType::RightAnti);

    let spec = parse("a >< b", &["a", "b"]);
    let SpecNode::FullJoin(fj) = spec.root() else {
        panic!("expected full join");
    };
    let (first, second) = try_split_full_join(&fj.op).unwrap();
    assert_eq!(first.ty, JoinType::LeftAnti);
    assert_eq!(second.ty, JoinType::RightAnti);
}

#[test]
fn split_rejects_non_full_ops() {
    let spec = parse("a >: b", &["a", "b"]);
    let SpecNode::Join(op) = spec.root() else {
        panic!("expected join");
    };
    assert!(try_split_full_join(op).is_err());
}

#[test]
fn display_canonicalizes_spacing_and_parens() {
    assert_eq!(parse("a:b", &["a", "b"]).to_string(), "a : b");
    assert_eq!(
        parse("(a >: b) : c", &["a", "b", "c"]).to_string(),
        "a >: b : c"
    );
    assert_eq!(
        parse("a : (b >:< c)", &["a", "b", "c"]).to_string(),
        "a : (b >:< c)"
    );
}

#[test]
fn display_round_trips_through_the_parser() {
    for text in [
        "a : b",
        "a :: b",
        "a >: (c : d)",
        "a > b",
        "a < b",
        "a >:< b",
        "a >< b",
        "a : b >: (c : d)",
    ] {
        let names = ["a", "b", "c", "d"];
        let used: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| text.contains(n))
            .collect();
        let canonical = parse(text, &used).to_string();
        assert_eq!(parse(&canonical, &used).to_string(), canonical);
    }
}

fn empty_and_filled() -> (Arc<dyn Table>, Arc<dyn Table>) {
    let schema = row_schema();
    let empty = MemTable::new("empty", schema.clone());
    let filled = MemTable::new("filled", schema);
    filled.insert(vec![Value::Int(1)]).unwrap();
    (Arc::new(empty), Arc::new(filled))
}

#[test]
fn emptiness_truth_table() {
    let schema = join_schema(&["a", "b"]);
    let (empty, filled) = empty_and_filled();

    let check = |text: &str, left: &Arc<dyn Table>, right: &Arc<dyn Table>, expect: bool| {
        let spec =
            JoinSpec::parse(text, schema.clone(), &[left.clone(), right.clone()]).unwrap();
        assert_eq!(spec.is_empty().unwrap(), expect, "{text}");
    };

    check("a : b", &filled, &empty, true);
    check("a : b", &filled, &filled, false);
    check("a >: b", &filled, &empty, false);
    check("a >: b", &empty, &filled, true);
    check("a :< b", &empty, &filled, false);
    check("a >:< b", &empty, &empty, true);
    check("a >:< b", &empty, &filled, false);
    // Anti joins with no predicate: a non-empty right side matches everything.
    check("a > b", &filled, &filled, true);
    check("a > b", &filled, &empty, false);
    check("a > b", &empty, &empty, true);
    check("a < b", &filled, &filled, true);
    check("a < b", &empty, &filled, false);
    check("a >< b", &filled, &filled, true);
    check("a >< b", &empty, &empty, true);
    check("a >< b", &empty, &filled, false);
}
