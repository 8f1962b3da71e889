//! Query-plan trees for diagnostics.
//!
//! Plans are plain values: structurally comparable, hashable, serializable.
//! The pretty printer emits one node per line with two-space indentation and
//! attaches `key columns`, `range`, `operation`, `filter`, `group by`, and
//! `assignments` sub-items where relevant. Nothing here executes; the driver
//! reports what it *will* do by building one of these trees.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One level of a nested-loops join.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Level {
    /// Join type binding this level to the previous ones; the outermost
    /// level has none.
    pub join_type: Option<String>,
    pub source: QueryPlan,
    /// Argument writes performed after this level matches, e.g. `?2 = p.id`.
    pub assignments: Vec<String>,
}

/// Diagnostic description of how a query will run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryPlan {
    Identity,
    Empty,
    FullScan {
        table: String,
        which: String,
        key_columns: Vec<String>,
    },
    RangeScan {
        table: String,
        which: String,
        key_columns: Vec<String>,
        range: String,
    },
    LoadOne {
        table: String,
        which: String,
        key_columns: Vec<String>,
        filter: String,
    },
    Filter {
        filter: String,
        source: Box<QueryPlan>,
    },
    Mapper {
        operation: String,
        source: Box<QueryPlan>,
    },
    Aggregator {
        operation: Option<String>,
        group_by: Vec<String>,
        source: Box<QueryPlan>,
    },
    Grouper {
        group_by: Vec<String>,
        source: Box<QueryPlan>,
    },
    Exists {
        source: Box<QueryPlan>,
    },
    Sort {
        ordering: Vec<String>,
        source: Box<QueryPlan>,
    },
    GroupSort {
        ordering: Vec<String>,
        source: Box<QueryPlan>,
    },
    NaturalJoin {
        table: String,
        which: String,
        key_columns: Vec<String>,
        source: Box<QueryPlan>,
    },
    PrimaryJoin {
        table: String,
        key_columns: Vec<String>,
        source: Box<QueryPlan>,
    },
    DisjointUnion {
        sources: Vec<QueryPlan>,
    },
    RangeUnion {
        sources: Vec<QueryPlan>,
    },
    MergeUnion {
        sources: Vec<QueryPlan>,
    },
    Concat {
        sources: Vec<QueryPlan>,
    },
    MergeConcat {
        sources: Vec<QueryPlan>,
    },
    NestedLoopsJoin {
        levels: Vec<Level>,
    },
}

impl QueryPlan {
    /// Render the plan tree as indented text.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        self.append(&mut lines, 0);
        lines.join("\n")
    }

    fn append(&self, lines: &mut Vec<String>, depth: usize) {
        match self {
            QueryPlan::Identity => node(lines, depth, "identity"),
            QueryPlan::Empty => node(lines, depth, "empty"),
            QueryPlan::FullScan {
                table,
                which,
                key_columns,
            } => {
                node(lines, depth, &format!("full scan over {which}: {table}"));
                key_columns_item(lines, depth + 1, key_columns);
            }
            QueryPlan::RangeScan {
                table,
                which,
                key_columns,
                range,
            } => {
                node(lines, depth, &format!("range scan over {which}: {table}"));
                key_columns_item(lines, depth + 1, key_columns);
                item(lines, depth + 1, &format!("range: {range}"));
            }
            QueryPlan::LoadOne {
                table,
                which,
                key_columns,
                filter,
            } => {
                node(lines, depth, &format!("load one from {which}: {table}"));
                key_columns_item(lines, depth + 1, key_columns);
                item(lines, depth + 1, &format!("filter: {filter}"));
            }
            QueryPlan::Filter { filter, source } => {
                node(lines, depth, &format!("filter: {filter}"));
                source.append(lines, depth + 1);
            }
            QueryPlan::Mapper { operation, source } => {
                node(lines, depth, "map");
                item(lines, depth + 1, &format!("operation: {operation}"));
                source.append(lines, depth + 1);
            }
            QueryPlan::Aggregator {
                operation,
                group_by,
                source,
            } => {
                node(lines, depth, "aggregate");
                if let Some(op) = operation {
                    item(lines, depth + 1, &format!("operation: {op}"));
                }
                if !group_by.is_empty() {
                    item(lines, depth + 1, &format!("group by: {}", group_by.join(", ")));
                }
                source.append(lines, depth + 1);
            }
            QueryPlan::Grouper { group_by, source } => {
                node(lines, depth, "group");
                item(lines, depth + 1, &format!("group by: {}", group_by.join(", ")));
                source.append(lines, depth + 1);
            }
            QueryPlan::Exists { source } => {
                node(lines, depth, "exists");
                source.append(lines, depth + 1);
            }
            QueryPlan::Sort { ordering, source } => {
                node(lines, depth, &format!("sort: {}", ordering.join(", ")));
                source.append(lines, depth + 1);
            }
            QueryPlan::GroupSort { ordering, source } => {
                node(lines, depth, &format!("group sort: {}", ordering.join(", ")));
                source.append(lines, depth + 1);
            }
            QueryPlan::NaturalJoin {
                table,
                which,
                key_columns,
                source,
            } => {
                node(lines, depth, &format!("natural join over {which}: {table}"));
                key_columns_item(lines, depth + 1, key_columns);
                source.append(lines, depth + 1);
            }
            QueryPlan::PrimaryJoin {
                table,
                key_columns,
                source,
            } => {
                node(lines, depth, &format!("primary join: {table}"));
                key_columns_item(lines, depth + 1, key_columns);
                source.append(lines, depth + 1);
            }
            QueryPlan::DisjointUnion { sources } => union(lines, depth, "disjoint union", sources),
            QueryPlan::RangeUnion { sources } => union(lines, depth, "range union", sources),
            QueryPlan::MergeUnion { sources } => union(lines, depth, "merge union", sources),
            QueryPlan::Concat { sources } => union(lines, depth, "concatenate", sources),
            QueryPlan::MergeConcat { sources } => {
                union(lines, depth, "merge concatenate", sources)
            }
            QueryPlan::NestedLoopsJoin { levels } => {
                node(lines, depth, "nested loops join");
                for level in levels {
                    node(lines, depth + 1, "level");
                    if let Some(ty) = &level.join_type {
                        item(lines, depth + 2, &format!("join type: {ty}"));
                    }
                    if !level.assignments.is_empty() {
                        item(
                            lines,
                            depth + 2,
                            &format!("assignments: {}", level.assignments.join(", ")),
                        );
                    }
                    level.source.append(lines, depth + 2);
                }
            }
        }
    }
}

fn node(lines: &mut Vec<String>, depth: usize, text: &str) {
    lines.push(format!("{}- {}", "  ".repeat(depth), text));
}

fn item(lines: &mut Vec<String>, depth: usize, text: &str) {
    lines.push(format!("{}{}", "  ".repeat(depth), text));
}

fn key_columns_item(lines: &mut Vec<String>, depth: usize, key_columns: &[String]) {
    if !key_columns.is_empty() {
        item(lines, depth, &format!("key columns: {}", key_columns.join(", ")));
    }
}

fn union(lines: &mut Vec<String>, depth: usize, label: &str, sources: &[QueryPlan]) {
    node(lines, depth, label);
    for source in sources {
        source.append(lines, depth + 1);
    }
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}
