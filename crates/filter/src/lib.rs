//! The row-filter algebra: boolean expressions over columns of a (possibly
//! joined) row, compared against bind arguments, other columns, or the null
//! literal.
//!
//! Filters are values. Every transformation returns a new filter, and all
//! construction goes through the `and`/`or` smart constructors so that a
//! filter's `Display` output is canonical: parsing the printed text yields an
//! equal filter.

mod parse;

use std::collections::BTreeSet;
use std::fmt;

use common::DbResult;
use serde::{Deserialize, Serialize};

/// Dotted column reference, e.g. `q.pid` or plain `pid`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColumnPath(Vec<String>);

impl ColumnPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn from_dotted(text: &str) -> Self {
        Self(text.split('.').map(str::to_string).collect())
    }

    pub fn head(&self) -> &str {
        &self.0[0]
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True for a bare reference to a whole source (`q` rather than `q.pid`).
    pub fn is_simple(&self) -> bool {
        self.0.len() == 1
    }

    /// Drop a leading source name, yielding a path relative to that source.
    pub fn strip_prefix(&self, prefix: &str) -> Option<ColumnPath> {
        if self.0.len() > 1 && self.0[0] == prefix {
            Some(ColumnPath(self.0[1..].to_vec()))
        } else {
            None
        }
    }

    pub fn with_prefix(&self, prefix: &str) -> ColumnPath {
        let mut segments = Vec::with_capacity(self.0.len() + 1);
        segments.push(prefix.to_string());
        segments.extend(self.0.iter().cloned());
        ColumnPath(segments)
    }
}

impl fmt::Display for ColumnPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Comparison operators of the algebra.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Ge,
    Lt,
    Le,
    Gt,
    In,
    NotIn,
}

impl CompareOp {
    pub fn token(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::In => "in",
            CompareOp::NotIn => "!in",
        }
    }

    pub fn is_exact(self) -> bool {
        self == CompareOp::Eq
    }

    pub fn is_range(self) -> bool {
        matches!(
            self,
            CompareOp::Ge | CompareOp::Lt | CompareOp::Le | CompareOp::Gt
        )
    }

    /// Operator for the same comparison with the operands swapped.
    /// Membership tests have no column form on the right, so they stay put.
    pub fn flipped(self) -> Option<CompareOp> {
        match self {
            CompareOp::Eq => Some(CompareOp::Eq),
            CompareOp::Ne => Some(CompareOp::Ne),
            CompareOp::Ge => Some(CompareOp::Le),
            CompareOp::Lt => Some(CompareOp::Gt),
            CompareOp::Le => Some(CompareOp::Ge),
            CompareOp::Gt => Some(CompareOp::Lt),
            CompareOp::In | CompareOp::NotIn => None,
        }
    }
}

/// Right-hand side of a comparison.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operand {
    /// Bind argument, 1-based. The planner stores a negative index to flag
    /// comparisons that need a null-aware variant at scanner-open time.
    Arg(i32),
    Column(ColumnPath),
    Null,
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Arg(n) => write!(f, "?{n}"),
            Operand::Column(path) => write!(f, "{path}"),
            Operand::Null => write!(f, "null"),
        }
    }
}

/// A single comparison leaf.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Compare {
    pub column: ColumnPath,
    pub op: CompareOp,
    pub rhs: Operand,
}

impl fmt::Display for Compare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op.token(), self.rhs)
    }
}

/// Boolean filter expression tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RowFilter {
    True,
    False,
    Compare(Compare),
    And(Vec<RowFilter>),
    Or(Vec<RowFilter>),
}

impl RowFilter {
    /// Parse filter text. See the grammar in `parse`.
    pub fn parse(text: &str) -> DbResult<RowFilter> {
        parse::parse(text)
    }

    pub fn compare(column: ColumnPath, op: CompareOp, rhs: Operand) -> RowFilter {
        RowFilter::Compare(Compare { column, op, rhs })
    }

    /// Conjunction smart constructor: flattens, drops `true`, absorbs `false`.
    pub fn and(children: Vec<RowFilter>) -> RowFilter {
        let mut out = Vec::new();
        for child in children {
            match child {
                RowFilter::True => {}
                RowFilter::False => return RowFilter::False,
                RowFilter::And(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => RowFilter::True,
            1 => out.pop().unwrap(),
            _ => RowFilter::And(out),
        }
    }

    /// Disjunction smart constructor: flattens, drops `false`, absorbs `true`.
    pub fn or(children: Vec<RowFilter>) -> RowFilter {
        let mut out = Vec::new();
        for child in children {
            match child {
                RowFilter::False => {}
                RowFilter::True => return RowFilter::True,
                RowFilter::Or(inner) => out.extend(inner),
                other => out.push(other),
            }
        }
        match out.len() {
            0 => RowFilter::False,
            1 => out.pop().unwrap(),
            _ => RowFilter::Or(out),
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, RowFilter::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, RowFilter::False)
    }

    /// Top-level conjuncts. `true` has none; any non-`And` filter is a single
    /// conjunct of itself.
    pub fn into_conjuncts(self) -> Vec<RowFilter> {
        match self {
            RowFilter::True => Vec::new(),
            RowFilter::And(children) => children,
            other => vec![other],
        }
    }

    /// Partition conjuncts into `(extracted, remainder)` by a per-conjunct
    /// decision.
    pub fn split<F>(&self, mut take: F) -> (RowFilter, RowFilter)
    where
        F: FnMut(&RowFilter) -> bool,
    {
        let mut extracted = Vec::new();
        let mut rest = Vec::new();
        for conjunct in self.clone().into_conjuncts() {
            if take(&conjunct) {
                extracted.push(conjunct);
            } else {
                rest.push(conjunct);
            }
        }
        (RowFilter::and(extracted), RowFilter::and(rest))
    }

    /// Conjunctive normal form, or `None` when distribution would exceed
    /// `max_clauses` conjuncts. Callers fall back to the original filter.
    pub fn cnf(&self, max_clauses: usize) -> Option<RowFilter> {
        // Each entry of the result is one CNF clause (a disjunction).
        fn clauses(filter: &RowFilter, max: usize) -> Option<Vec<RowFilter>> {
            match filter {
                RowFilter::True => Some(Vec::new()),
                RowFilter::And(children) => {
                    let mut out = Vec::new();
                    for child in children {
                        out.extend(clauses(child, max)?);
                        if out.len() > max {
                            return None;
                        }
                    }
                    Some(out)
                }
                RowFilter::Or(children) => {
                    // Distribute: one clause per combination of child clauses.
                    let mut combos: Vec<Vec<RowFilter>> = vec![Vec::new()];
                    for child in children {
                        let child_clauses = clauses(child, max)?;
                        if child_clauses.is_empty() {
                            // Child is `true`; the whole disjunction is true.
                            return Some(Vec::new());
                        }
                        let mut next = Vec::with_capacity(combos.len() * child_clauses.len());
                        for combo in &combos {
                            for clause in &child_clauses {
                                let mut widened = combo.clone();
                                widened.push(clause.clone());
                                next.push(widened);
                            }
                        }
                        if next.len() > max {
                            return None;
                        }
                        combos = next;
                    }
                    Some(combos.into_iter().map(RowFilter::or).collect())
                }
                other => Some(vec![other.clone()]),
            }
        }

        clauses(self, max_clauses).map(RowFilter::and)
    }

    /// Rewrite every comparison leaf, re-simplifying the tree.
    pub fn map_compares<F>(&self, rewrite: &mut F) -> RowFilter
    where
        F: FnMut(&Compare) -> RowFilter,
    {
        match self {
            RowFilter::True => RowFilter::True,
            RowFilter::False => RowFilter::False,
            RowFilter::Compare(cmp) => rewrite(cmp),
            RowFilter::And(children) => {
                RowFilter::and(children.iter().map(|c| c.map_compares(rewrite)).collect())
            }
            RowFilter::Or(children) => {
                RowFilter::or(children.iter().map(|c| c.map_compares(rewrite)).collect())
            }
        }
    }

    /// Visit every comparison leaf.
    pub fn for_each_compare<F>(&self, visit: &mut F)
    where
        F: FnMut(&Compare),
    {
        match self {
            RowFilter::True | RowFilter::False => {}
            RowFilter::Compare(cmp) => visit(cmp),
            RowFilter::And(children) | RowFilter::Or(children) => {
                for child in children {
                    child.for_each_compare(visit);
                }
            }
        }
    }

    /// Keep the comparisons the predicate accepts; removed leaves become the
    /// supplied constant and the tree is re-simplified.
    pub fn retain<F>(&self, keep: &F, removed: bool) -> RowFilter
    where
        F: Fn(&Compare) -> bool,
    {
        let replacement = if removed {
            RowFilter::True
        } else {
            RowFilter::False
        };
        self.map_compares(&mut |cmp| {
            if keep(cmp) {
                RowFilter::Compare(cmp.clone())
            } else {
                replacement.clone()
            }
        })
    }

    /// Substitute the null literal for one argument. Matches by magnitude so
    /// it applies to the planner's negative indices as well.
    pub fn argument_as_null(&self, arg: u32) -> RowFilter {
        self.map_compares(&mut |cmp| {
            if matches!(cmp.rhs, Operand::Arg(n) if n.unsigned_abs() == arg) {
                RowFilter::compare(cmp.column.clone(), cmp.op, Operand::Null)
            } else {
                RowFilter::Compare(cmp.clone())
            }
        })
    }

    /// Remap argument indices, e.g. to flip the planner's negative flags
    /// before the text reaches a scanner.
    pub fn replace_arguments<F>(&self, remap: &F) -> RowFilter
    where
        F: Fn(i32) -> i32,
    {
        self.map_compares(&mut |cmp| {
            if let Operand::Arg(n) = cmp.rhs {
                RowFilter::compare(cmp.column.clone(), cmp.op, Operand::Arg(remap(n)))
            } else {
                RowFilter::Compare(cmp.clone())
            }
        })
    }

    /// Highest argument magnitude referenced, or 0.
    pub fn max_argument(&self) -> u32 {
        let mut max = 0;
        self.for_each_compare(&mut |cmp| {
            if let Operand::Arg(n) = cmp.rhs {
                max = max.max(n.unsigned_abs());
            }
        });
        max
    }

    /// Leading path segments of every column referenced, left side or right.
    pub fn sources(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.for_each_compare(&mut |cmp| {
            out.insert(cmp.column.head().to_string());
            if let Operand::Column(path) = &cmp.rhs {
                out.insert(path.head().to_string());
            }
        });
        out
    }

    /// Validate every column reference through the supplied resolver.
    pub fn check_columns<F>(&self, valid: F) -> DbResult<()>
    where
        F: Fn(&ColumnPath) -> bool,
    {
        let mut bad = None;
        self.for_each_compare(&mut |cmp| {
            if bad.is_some() {
                return;
            }
            if !valid(&cmp.column) {
                bad = Some(cmp.column.clone());
            } else if let Operand::Column(path) = &cmp.rhs {
                if !valid(path) {
                    bad = Some(path.clone());
                }
            }
        });
        match bad {
            Some(path) => Err(common::DbError::UnknownColumn(path.to_string())),
            None => Ok(()),
        }
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_inner(f, false)
    }
}

impl RowFilter {
    fn fmt_inner(&self, f: &mut fmt::Formatter<'_>, in_and: bool) -> fmt::Result {
        match self {
            RowFilter::True => write!(f, "true"),
            RowFilter::False => write!(f, "false"),
            RowFilter::Compare(cmp) => write!(f, "{cmp}"),
            RowFilter::And(children) => {
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " && ")?;
                    }
                    child.fmt_inner(f, true)?;
                }
                Ok(())
            }
            RowFilter::Or(children) => {
                if in_and {
                    write!(f, "(")?;
                }
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " || ")?;
                    }
                    child.fmt_inner(f, false)?;
                }
                if in_and {
                    write!(f, ")")?;
                }
                Ok(())
            }
        }
    }
}
