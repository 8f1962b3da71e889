//! The reference tables the join test suites share.
//!
//! `P(id, name)` holds `{(1,"a"), (2,"b"), (3,"c")}` and `Q(pid, tag)` holds
//! `{(1,"x"), (1,"y"), (3,"z")}`. `p.name` is nullable so null-aware
//! argument propagation can be exercised.

use std::sync::Arc;

use catalog::{ColumnInfo, JoinColumn, JoinSchema, RowSchema};
use join::JoinTable;
use storage::{MemTable, NoTxn, Table, Transaction};
use types::{Value, ValueType};

pub fn p_schema() -> Arc<RowSchema> {
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

pub fn q_schema() -> Arc<RowSchema> {
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

pub fn p_table() -> Arc<MemTable> {
    let table = MemTable::new("p", p_schema());
    for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
        table
            .insert(vec![Value::Int(id), Value::Text(name.into())])
            .unwrap();
    }
    Arc::new(table)
}

pub fn q_table() -> Arc<MemTable> {
    let table = MemTable::new("q", q_schema());
    for (pid, tag) in [(1, "x"), (1, "y"), (3, "z")] {
        table
            .insert(vec![Value::Int(pid), Value::Text(tag.into())])
            .unwrap();
    }
    Arc::new(table)
}

pub fn pq_join_schema() -> Arc<JoinSchema> {
    Arc::new(
        JoinSchema::new(vec![
            JoinColumn::new("p", p_schema()),
            JoinColumn::new("q", q_schema()),
        ])
        .unwrap(),
    )
}

/// Open a join table over the reference P and Q data.
pub fn open_pq(spec_text: &str) -> JoinTable {
    open_pq_with(spec_text, p_table(), q_table())
}

/// Open a join table over custom P and Q handles (e.g. tracking wrappers).
pub fn open_pq_with(
    spec_text: &str,
    p: Arc<dyn Table>,
    q: Arc<dyn Table>,
) -> JoinTable {
    JoinTable::open(spec_text, pq_join_schema(), vec![p, q]).unwrap()
}

/// Shared no-op transaction handle.
pub fn no_txn() -> Arc<dyn Transaction> {
    Arc::new(NoTxn)
}
