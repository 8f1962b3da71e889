use super::*;
use catalog::{ColumnInfo, JoinColumn, JoinSchema};
use pretty_assertions::assert_eq;
use storage::MemTable;
use types::{Value, ValueType};

fn p_schema() -> Arc<RowSchema> {
    Arc::new(
        RowSchema::new(
            vec![
                ColumnInfo::new("id", ValueType::Int),
                ColumnInfo::new("name", ValueType::Text).nullable(),
            ],
            &["id"],
        )
        .unwrap(),
    )
}

fn q_schema() -> Arc<RowSchema> {
    Arc::new(
        RowSchema::new(
            vec![
                ColumnInfo::new("pid", ValueType::Int),
                ColumnInfo::new("tag", ValueType::Text),
            ],
            &["pid", "tag"],
        )
        .unwrap(),
    )
}

fn pq_spec(text: &str) -> JoinSpec {
    let schema = Arc::new(
        JoinSchema::new(vec![
            JoinColumn::new("p", p_schema()),
            JoinColumn::new("q", q_schema()),
        ])
        .unwrap(),
    );
    let p = MemTable::new("p", p_schema());
    p.insert(vec![Value::Int(1), Value::Text("a".into())]).unwrap();
    let q = MemTable::new("q", q_schema());
    q.insert(vec![Value::Int(1), Value::Text("x".into())]).unwrap();
    JoinSpec::parse(text, schema, &[Arc::new(p), Arc::new(q)]).unwrap()
}

fn query(text: &str) -> RowFilter {
    RowFilter::parse(text).unwrap()
}

fn planned(spec_text: &str, query_text: &str) -> PlannedSpec {
    plan(
        &pq_spec(spec_text),
        &query(query_text),
        &PlannerConfig::default(),
    )
    .unwrap()
}

fn find_column<'a>(node: &'a PlannedNode, name: &str) -> &'a PlannedColumn {
    fn walk<'a>(node: &'a PlannedNode, name: &str) -> Option<&'a PlannedColumn> {
        match node {
            PlannedNode::Column(col) => (col.name == name).then_some(col),
            PlannedNode::Join(join) => {
                walk(&join.left, name).or_else(|| walk(&join.right, name))
            }
            PlannedNode::Full(_) => None,
        }
    }
    walk(node, name).unwrap_or_else(|| panic!("no planned column '{name}'"))
}

#[test]
fn straight_join_hoists_column_to_column_into_an_argument() {
    let planned = planned("p :: q", "p.id == q.pid");

    let p = find_column(&planned.root, "p");
    assert_eq!(p.assignments.len(), 1);
    assert_eq!(p.assignments[0].display(), "?1 = p.id");
    assert!(p.filter.is_none());

    let q = find_column(&planned.root, "q");
    assert_eq!(q.filter.as_ref().unwrap().to_string(), "pid == ?1");
    assert_eq!(q.arg_sources, vec!["p".to_string()]);
    assert!(q.remainder.is_none());
    assert!(q.null_args.is_empty());

    assert_eq!(planned.user_args, 0);
    assert_eq!(planned.total_args, 1);
    assert!(planned.residual.is_true());
}

#[test]
fn fresh_arguments_allocate_above_the_callers_highest() {
    let planned = planned("p :: q", "p.name == ?3 && p.id == q.pid");
    let p = find_column(&planned.root, "p");
    assert_eq!(p.assignments[0].display(), "?4 = p.id");
    assert_eq!(planned.user_args, 3);
    assert_eq!(planned.total_args, 4);
}

#[test]
fn inner_group_reorders_toward_a_key_lookup() {
    // Scanning q first turns every p access into a primary-key load, which
    // outscores the unkeyed order.
    let planned = planned("p : q", "p.id == q.pid");

    let q = find_column(&planned.root, "q");
    assert_eq!(q.assignments.len(), 1);
    assert_eq!(q.assignments[0].display(), "?1 = q.pid");

    let p = find_column(&planned.root, "p");
    assert_eq!(p.filter.as_ref().unwrap().to_string(), "id == ?1");

    let QueryPlan::NestedLoopsJoin { levels } = planned.query_plan().unwrap() else {
        panic!("expected nested loops join");
    };
    assert!(matches!(
        &levels[0].source,
        QueryPlan::FullScan { table, .. } if table == "q"
    ));
    assert!(matches!(
        &levels[1].source,
        QueryPlan::LoadOne { table, .. } if table == "p"
    ));
}

#[test]
fn straight_joins_are_never_reordered() {
    let planned = planned("p :: q", "p.id == q.pid");
    let QueryPlan::NestedLoopsJoin { levels } = planned.query_plan().unwrap() else {
        panic!("expected nested loops join");
    };
    assert!(matches!(
        &levels[0].source,
        QueryPlan::FullScan { table, .. } if table == "p"
    ));
    assert_eq!(levels[1].join_type.as_deref(), Some("straight"));
}

#[test]
fn nullability_mismatch_flags_a_negative_argument() {
    // p.name is nullable, q.tag is not.
    let planned = planned("p :: q", "p.name == q.tag");

    let q = find_column(&planned.root, "q");
    assert_eq!(q.filter.as_ref().unwrap().to_string(), "tag == ?-1");
    assert_eq!(q.null_args, vec![1]);
    assert_eq!(
        PlannedSpec::scanner_filter_text(q.filter.as_ref().unwrap()),
        "tag == ?1"
    );
}

#[test]
fn outer_predicate_weakens_cross_source_leaves() {
    let planned = planned("p >: q", "p.id == q.pid || q == null");

    let q = find_column(&planned.root, "q");
    // The scanner filter drops the whole-row null test: scanned rows exist.
    assert_eq!(q.filter.as_ref().unwrap().to_string(), "pid == ?1");

    // The padding predicate weakens the cross-source equality to true, so
    // the null-extended row survives.
    let PlannedNode::Join(join) = &planned.root else {
        panic!("expected join");
    };
    assert_eq!(join.ty, JoinType::LeftOuter);
    assert!(join.predicate.is_none());
}

#[test]
fn local_conjuncts_survive_in_the_outer_predicate() {
    let planned = planned("p >: q", "q.tag == ?1");
    let PlannedNode::Join(join) = &planned.root else {
        panic!("expected join");
    };
    assert_eq!(join.predicate.as_ref().unwrap().to_string(), "q.tag == ?1");
}

#[test]
fn anti_join_last_source_becomes_an_exists_probe() {
    let planned = planned("p > q", "p.id == q.pid");
    let PlannedNode::Join(join) = &planned.root else {
        panic!("expected join");
    };
    assert_eq!(join.ty, JoinType::LeftAnti);
    let PlannedNode::Column(q) = &join.right else {
        panic!("expected column");
    };
    assert!(q.exists_probe);

    let QueryPlan::NestedLoopsJoin { levels } = planned.query_plan().unwrap() else {
        panic!("expected nested loops join");
    };
    assert!(matches!(&levels[1].source, QueryPlan::Exists { .. }));
}

#[test]
fn probe_is_skipped_when_the_anti_source_keeps_a_remainder() {
    // The disjunct over p alone cannot reach q's scanner, so the conjunct
    // stays as a remainder and the probe optimization must not apply.
    let planned = planned("p > q", "p.id == q.pid || p.name == ?1");
    let PlannedNode::Join(join) = &planned.root else {
        panic!("expected join");
    };
    let PlannedNode::Column(q) = &join.right else {
        panic!("expected column");
    };
    assert!(q.remainder.is_some());
    assert!(!q.exists_probe);
}

#[test]
fn constant_false_query_becomes_the_residual() {
    let planned = planned("p :: q", "false");
    assert!(planned.residual.is_false());
    let result = planned.query_plan().unwrap();
    assert!(matches!(
        result,
        QueryPlan::Filter { ref filter, .. } if filter == "false"
    ));
}

#[test]
fn whole_source_null_test_empties_an_inner_level() {
    let planned = planned("p :: q", "p == null");
    let p = find_column(&planned.root, "p");
    assert!(p.filter.as_ref().unwrap().is_false());

    let QueryPlan::NestedLoopsJoin { levels } = planned.query_plan().unwrap() else {
        panic!("expected nested loops join");
    };
    assert_eq!(levels[0].source, QueryPlan::Empty);
}

#[test]
fn unknown_query_columns_fail_fast() {
    let err = plan(
        &pq_spec("p :: q"),
        &query("r.id == ?1"),
        &PlannerConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, DbError::UnknownColumn(_)));
}

#[test]
fn large_groups_fall_back_to_greedy_ordering() {
    let schema = p_schema();
    let names = ["a", "b", "c", "d"];
    let join_schema = Arc::new(
        JoinSchema::new(
            names
                .iter()
                .map(|n| JoinColumn::new(n, schema.clone()))
                .collect(),
        )
        .unwrap(),
    );
    let tables: Vec<Arc<dyn Table>> = names
        .iter()
        .map(|n| Arc::new(MemTable::new(n, schema.clone())) as Arc<dyn Table>)
        .collect();
    let spec = JoinSpec::parse("a : b : c : d", join_schema, &tables).unwrap();

    let config = PlannerConfig::builder().max_permute(2).build();
    let planned = plan(&spec, &query("a.id == ?1 && b.id == a.id"), &config).unwrap();

    // The argument-backed lookup should still be discovered greedily: `a`
    // scans by key and `b` consumes the propagated value.
    let a = find_column(&planned.root, "a");
    assert_eq!(a.filter.as_ref().unwrap().to_string(), "id == ?1");
    let b = find_column(&planned.root, "b");
    assert_eq!(b.filter.as_ref().unwrap().to_string(), "id == ?2");
}

#[test]
fn one_row_tables_are_ordered_first_on_ties() {
    let schema = p_schema();
    let join_schema = Arc::new(
        JoinSchema::new(vec![
            JoinColumn::new("big", schema.clone()),
            JoinColumn::new("tiny", schema.clone()),
        ])
        .unwrap(),
    );
    let big = Arc::new(MemTable::new("big", schema.clone())) as Arc<dyn Table>;
    let tiny = Arc::new(
        MemTable::new("tiny", schema.clone()).with_cardinality(storage::Cardinality::AtMostOne),
    ) as Arc<dyn Table>;
    let spec = JoinSpec::parse("big : tiny", join_schema, &[big, tiny]).unwrap();

    let planned = plan(&spec, &RowFilter::True, &PlannerConfig::default()).unwrap();
    let QueryPlan::NestedLoopsJoin { levels } = planned.query_plan().unwrap() else {
        panic!("expected nested loops join");
    };
    assert!(matches!(
        &levels[0].source,
        QueryPlan::FullScan { table, .. } if table == "tiny"
    ));
}

#[test]
fn nested_full_join_plans_as_a_union_source() {
    let schema = p_schema();
    let join_schema = Arc::new(
        JoinSchema::new(vec![
            JoinColumn::new("x", schema.clone()),
            JoinColumn::new("a", schema.clone()),
            JoinColumn::new("b", schema.clone()),
        ])
        .unwrap(),
    );
    let tables: Vec<Arc<dyn Table>> = ["x", "a", "b"]
        .iter()
        .map(|n| Arc::new(MemTable::new(n, schema.clone())) as Arc<dyn Table>)
        .collect();
    let spec = JoinSpec::parse("x :: (a >:< b)", join_schema, &tables).unwrap();

    let planned = plan(&spec, &query("a.id == x.id"), &PlannerConfig::default()).unwrap();

    fn find_full(node: &PlannedNode) -> Option<&PlannedFullJoin> {
        match node {
            PlannedNode::Full(full) => Some(full),
            PlannedNode::Join(join) => {
                find_full(&join.left).or_else(|| find_full(&join.right))
            }
            PlannedNode::Column(_) => None,
        }
    }
    let full = find_full(&planned.root).expect("full join source");
    assert_eq!(full.name, "fj0");
    // The pushed-down query reaches both halves with the hoisted argument;
    // the slot is negative because full-join members can be null-padded.
    let a_first = find_column(&full.first.root, "a");
    assert_eq!(
        PlannedSpec::scanner_filter_text(a_first.filter.as_ref().unwrap()),
        "id == ?1"
    );
    assert_eq!(a_first.null_args, vec![1]);
    assert_eq!(full.arg_sources, vec!["x".to_string()]);

    let result = planned.query_plan().unwrap();
    let QueryPlan::NestedLoopsJoin { levels } = result else {
        panic!("expected nested loops join");
    };
    assert!(matches!(&levels[1].source, QueryPlan::DisjointUnion { .. }));
}

#[test]
fn query_plan_snapshot_for_a_straight_join() {
    let planned = planned("p :: q", "p.id == q.pid");
    insta::assert_snapshot!(planned.query_plan().unwrap().render(), @r"
    - nested loops join
      - level
        assignments: ?1 = p.id
        - full scan over primary key: p
          key columns: id
      - level
        join type: straight
        - filter: pid == ?1
          - full scan over primary key: q
            key columns: pid, tag
    ");
}
