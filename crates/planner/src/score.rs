//! Scoring for candidate join orderings.
//!
//! Per level the planner compares, in priority order: exact key coverage,
//! filter reduction, at-most-one-row sources, grouped sources. Orderings are
//! compared lexicographically over their level scores, outermost first.

use std::collections::BTreeSet;

use catalog::RowSchema;
use filter::{Compare, CompareOp, Operand, RowFilter};

const EXACT_WEIGHT: u64 = 1 << 42;
const RANGE_WEIGHT: u64 = 1 << 21;

/// Larger is better; the derived ordering compares fields in declaration
/// order, which is exactly the priority order above.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct LevelScore {
    pub key: u8,
    pub filter: u64,
    pub one_row: bool,
    pub grouped: bool,
}

/// Is the comparison's right side bound by the time this level scans:
/// an argument, the null literal, or a column of an earlier source.
fn rhs_bound(cmp: &Compare, available: &BTreeSet<String>) -> bool {
    match &cmp.rhs {
        Operand::Arg(_) | Operand::Null => true,
        Operand::Column(path) => available.contains(path.head()),
    }
}

/// A comparison narrows a scan of the source when the source's column sits on
/// either side and the other side is bound. Returns the source-side column
/// path when so.
fn narrowing_column<'a>(
    cmp: &'a Compare,
    names: &[String],
    available: &BTreeSet<String>,
) -> Option<&'a filter::ColumnPath> {
    let lhs_mine = names.iter().any(|n| n == cmp.column.head());
    if lhs_mine && rhs_bound(cmp, available) {
        return Some(&cmp.column);
    }
    if let Operand::Column(path) = &cmp.rhs {
        if names.iter().any(|n| n == path.head()) && available.contains(cmp.column.head()) {
            return Some(path);
        }
    }
    None
}

/// Score how effectively a filter reduces a scan of the given source.
/// `and` saturates, `or` is pessimistic, unbound references contribute zero.
pub(crate) fn filter_score(
    filter: &RowFilter,
    names: &[String],
    available: &BTreeSet<String>,
) -> u64 {
    match filter {
        RowFilter::True | RowFilter::False => 0,
        RowFilter::And(children) => children
            .iter()
            .fold(0u64, |acc, c| acc.saturating_add(filter_score(c, names, available))),
        RowFilter::Or(children) => children
            .iter()
            .map(|c| filter_score(c, names, available))
            .min()
            .unwrap_or(0),
        RowFilter::Compare(cmp) => {
            if narrowing_column(cmp, names, available).is_none() {
                0
            } else if cmp.op.is_exact() {
                EXACT_WEIGHT
            } else if cmp.op.is_range() {
                RANGE_WEIGHT
            } else {
                1
            }
        }
    }
}

/// Does the filter pin a whole key of the table? 2 for the primary key,
/// 1 for an alternate key, 0 otherwise. Every key column must appear under
/// `and` with `==` against a bound operand; an `or` matches only if every
/// branch matches.
pub(crate) fn key_match(
    filter: &RowFilter,
    source: &str,
    schema: &RowSchema,
    available: &BTreeSet<String>,
) -> u8 {
    let covered = covered_columns(filter, source, schema, available);
    let full = |key: &[usize]| !key.is_empty() && key.iter().all(|c| covered.contains(c));

    if full(schema.primary_key()) {
        2
    } else if schema.alternate_keys().iter().any(|k| full(k)) {
        1
    } else {
        0
    }
}

/// Column ordinals of `source` pinned by equality throughout the filter.
fn covered_columns(
    filter: &RowFilter,
    source: &str,
    schema: &RowSchema,
    available: &BTreeSet<String>,
) -> BTreeSet<usize> {
    match filter {
        RowFilter::True | RowFilter::False => BTreeSet::new(),
        RowFilter::And(children) => {
            let mut out = BTreeSet::new();
            for child in children {
                out.extend(covered_columns(child, source, schema, available));
            }
            out
        }
        RowFilter::Or(children) => {
            let mut iter = children.iter();
            let mut out = match iter.next() {
                Some(first) => covered_columns(first, source, schema, available),
                None => return BTreeSet::new(),
            };
            for child in iter {
                let next = covered_columns(child, source, schema, available);
                out = out.intersection(&next).copied().collect();
            }
            out
        }
        RowFilter::Compare(cmp) => {
            let mut out = BTreeSet::new();
            let names = vec![source.to_string()];
            if cmp.op == CompareOp::Eq {
                if let Some(path) = narrowing_column(cmp, &names, available) {
                    if path.segments().len() == 2 {
                        if let Some(ordinal) = schema.column_index(&path.segments()[1]) {
                            out.insert(ordinal);
                        }
                    }
                }
            }
            out
        }
    }
}
