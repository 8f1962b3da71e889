//! Property-based generators for core join types.

use proptest::prelude::*;
use types::Value;

/// Any scalar value, nulls included.
pub fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Int),
        any::<u64>().prop_map(Value::Uint),
        any::<f64>().prop_map(Value::Float),
        "[a-z]{0,8}".prop_map(Value::Text),
    ]
}

/// A filter-text comparison over the P/Q reference layout.
pub fn arb_pq_compare() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["p.id", "p.name", "q.pid", "q.tag"]),
        prop::sample::select(vec!["==", "!=", ">=", "<", "<=", ">"]),
        prop::sample::select(vec!["?1", "?2", "null"]),
    )
        .prop_map(|(col, op, rhs)| format!("{col} {op} {rhs}"))
}
