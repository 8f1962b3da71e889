//! Join specifications: the algebraic tree a join query is planned from.
//!
//! A spec is parsed once from text like `a : b >: (c : d)`, validated against
//! the declared join schema and the caller's table handles, and then treated
//! as immutable. The planner works on its own deep copy.

mod parse;
#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use catalog::{JoinSchema, RowSchema};
use common::{DbError, DbResult};
use storage::Table;

/// The eight algebraic join types.
///
/// Right variants are the left variants with the children swapped; the
/// planner never sees them after `to_left_join` normalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Straight,
    LeftOuter,
    RightOuter,
    FullOuter,
    LeftAnti,
    RightAnti,
    FullAnti,
}

impl JoinType {
    pub fn token(self) -> &'static str {
        match self {
            JoinType::Inner => ":",
            JoinType::Straight => "::",
            JoinType::LeftOuter => ">:",
            JoinType::RightOuter => ":<",
            JoinType::FullOuter => ">:<",
            JoinType::LeftAnti => ">",
            JoinType::RightAnti => "<",
            JoinType::FullAnti => "><",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            JoinType::Inner => "inner",
            JoinType::Straight => "straight",
            JoinType::LeftOuter => "left outer",
            JoinType::RightOuter => "right outer",
            JoinType::FullOuter => "full outer",
            JoinType::LeftAnti => "left anti",
            JoinType::RightAnti => "right anti",
            JoinType::FullAnti => "full anti",
        }
    }

    pub fn is_full(self) -> bool {
        matches!(self, JoinType::FullOuter | JoinType::FullAnti)
    }

    pub fn is_right(self) -> bool {
        matches!(self, JoinType::RightOuter | JoinType::RightAnti)
    }

    /// The left variant of a right join; other types map to themselves.
    pub fn to_left(self) -> JoinType {
        match self {
            JoinType::RightOuter => JoinType::LeftOuter,
            JoinType::RightAnti => JoinType::LeftAnti,
            other => other,
        }
    }
}

/// One table participating in the join, bound to its declared column.
#[derive(Clone)]
pub struct ColumnRef {
    pub name: String,
    pub table: Arc<dyn Table>,
    pub schema: Arc<RowSchema>,
    pub nullable: bool,
}

impl fmt::Debug for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnRef")
            .field("name", &self.name)
            .field("table", &self.table.name())
            .field("nullable", &self.nullable)
            .finish()
    }
}

/// Binary join operator.
#[derive(Clone, Debug)]
pub struct JoinOp {
    pub ty: JoinType,
    pub left: SpecNode,
    pub right: SpecNode,
}

/// Wrapper giving a full-outer/full-anti operator a single source name, so
/// the driver can treat the whole thing as one level executed as a union of
/// two simpler plans.
#[derive(Clone, Debug)]
pub struct FullJoin {
    pub name: String,
    pub op: JoinOp,
}

/// Node of the join-spec tree.
#[derive(Clone, Debug)]
pub enum SpecNode {
    Column(ColumnRef),
    Join(Box<JoinOp>),
    /// Two or more consecutive inner joins, grouped so the planner may
    /// reorder them.
    InnerJoins(Vec<SpecNode>),
    FullJoin(Box<FullJoin>),
}

impl SpecNode {
    /// In-order iteration over leaf columns, full joins included.
    pub fn columns(&self) -> Columns<'_> {
        Columns { stack: vec![self] }
    }

    /// Top-level sources: columns and full joins, without descending into a
    /// full join's operands.
    pub fn sources(&self) -> Vec<SourceRef<'_>> {
        let mut out = Vec::new();
        self.collect_sources(&mut out);
        out
    }

    fn collect_sources<'a>(&'a self, out: &mut Vec<SourceRef<'a>>) {
        match self {
            SpecNode::Column(col) => out.push(SourceRef::Column(col)),
            SpecNode::FullJoin(fj) => out.push(SourceRef::Full(fj)),
            SpecNode::Join(op) => {
                op.left.collect_sources(out);
                op.right.collect_sources(out);
            }
            SpecNode::InnerJoins(children) => {
                for child in children {
                    child.collect_sources(out);
                }
            }
        }
    }

    /// Rewrite right joins into left joins by swapping children. The
    /// resulting tree contains no `RightOuter` or `RightAnti` operators.
    pub fn to_left_join(self) -> SpecNode {
        match self {
            SpecNode::Column(col) => SpecNode::Column(col),
            SpecNode::InnerJoins(children) => {
                SpecNode::InnerJoins(children.into_iter().map(SpecNode::to_left_join).collect())
            }
            SpecNode::Join(op) => {
                let left = op.left.to_left_join();
                let right = op.right.to_left_join();
                if op.ty.is_right() {
                    SpecNode::Join(Box::new(JoinOp {
                        ty: op.ty.to_left(),
                        left: right,
                        right: left,
                    }))
                } else {
                    SpecNode::Join(Box::new(JoinOp {
                        ty: op.ty,
                        left,
                        right,
                    }))
                }
            }
            SpecNode::FullJoin(fj) => SpecNode::FullJoin(Box::new(FullJoin {
                name: fj.name.clone(),
                op: JoinOp {
                    ty: fj.op.ty,
                    left: fj.op.left.to_left_join(),
                    right: fj.op.right.to_left_join(),
                },
            })),
        }
    }

    /// Would this join produce zero rows with no predicate applied? Uses
    /// each table's fast emptiness check.
    pub fn is_empty(&self) -> DbResult<bool> {
        match self {
            SpecNode::Column(col) => col.table.is_empty(),
            SpecNode::InnerJoins(children) => {
                for child in children {
                    if child.is_empty()? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            SpecNode::FullJoin(fj) => join_op_is_empty(&fj.op),
            SpecNode::Join(op) => join_op_is_empty(op),
        }
    }
}

fn join_op_is_empty(op: &JoinOp) -> DbResult<bool> {
    let left = op.left.is_empty()?;
    let right = op.right.is_empty()?;
    Ok(match op.ty {
        JoinType::Inner | JoinType::Straight => left || right,
        JoinType::LeftOuter => left,
        JoinType::RightOuter => right,
        JoinType::FullOuter => left && right,
        // With no predicate, every right row "matches" every left row, so a
        // non-empty right side annihilates the anti join.
        JoinType::LeftAnti => left || !right,
        JoinType::RightAnti => right || !left,
        JoinType::FullAnti => (left && right) || (!left && !right),
    })
}

/// Split a full join into the two disjoint plans it executes as:
/// `A >:< B` becomes `{A >: B, A < B}`, `A >< B` becomes `{A > B, A < B}`.
pub fn try_split_full_join(op: &JoinOp) -> DbResult<(JoinOp, JoinOp)> {
    let first_ty = match op.ty {
        JoinType::FullOuter => JoinType::LeftOuter,
        JoinType::FullAnti => JoinType::LeftAnti,
        other => {
            return Err(DbError::UnsupportedJoinType(format!(
                "cannot split '{}'",
                other.token()
            )));
        }
    };
    let first = JoinOp {
        ty: first_ty,
        left: op.left.clone(),
        right: op.right.clone(),
    };
    let second = JoinOp {
        ty: JoinType::RightAnti,
        left: op.left.clone(),
        right: op.right.clone(),
    };
    Ok((first, second))
}

/// Lazy in-order iterator over leaf columns.
pub struct Columns<'a> {
    stack: Vec<&'a SpecNode>,
}

impl<'a> Iterator for Columns<'a> {
    type Item = &'a ColumnRef;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            match node {
                SpecNode::Column(col) => return Some(col),
                SpecNode::Join(op) => {
                    self.stack.push(&op.right);
                    self.stack.push(&op.left);
                }
                SpecNode::InnerJoins(children) => {
                    for child in children.iter().rev() {
                        self.stack.push(child);
                    }
                }
                SpecNode::FullJoin(fj) => {
                    self.stack.push(&fj.op.right);
                    self.stack.push(&fj.op.left);
                }
            }
        }
        None
    }
}

/// A top-level source: the unit that owns one scanner at run time.
pub enum SourceRef<'a> {
    Column(&'a ColumnRef),
    Full(&'a FullJoin),
}

impl SourceRef<'_> {
    pub fn name(&self) -> &str {
        match self {
            SourceRef::Column(col) => &col.name,
            SourceRef::Full(fj) => &fj.name,
        }
    }
}

/// A parsed join specification bound to its schema.
#[derive(Clone, Debug)]
pub struct JoinSpec {
    root: SpecNode,
    schema: Arc<JoinSchema>,
}

impl JoinSpec {
    /// Parse spec text, binding each column identifier to the declared join
    /// schema and to the caller-supplied table handles by position.
    pub fn parse(
        text: &str,
        schema: Arc<JoinSchema>,
        tables: &[Arc<dyn Table>],
    ) -> DbResult<JoinSpec> {
        let root = parse::parse(text, &schema, tables)?;
        Ok(JoinSpec { root, schema })
    }

    pub fn from_root(root: SpecNode, schema: Arc<JoinSchema>) -> JoinSpec {
        JoinSpec { root, schema }
    }

    pub fn root(&self) -> &SpecNode {
        &self.root
    }

    pub fn schema(&self) -> &Arc<JoinSchema> {
        &self.schema
    }

    pub fn into_root(self) -> SpecNode {
        self.root
    }

    pub fn is_empty(&self) -> DbResult<bool> {
        self.root.is_empty()
    }
}

impl fmt::Display for JoinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_node(&self.root, f, true)
    }
}

impl fmt::Display for SpecNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_node(self, f, true)
    }
}

// Canonical text. The left end of a chain re-parses to the same tree without
// parentheses; every other compound operand is parenthesized.
fn fmt_node(node: &SpecNode, f: &mut fmt::Formatter<'_>, leftmost: bool) -> fmt::Result {
    match node {
        SpecNode::Column(col) => write!(f, "{}", col.name),
        compound if !leftmost => {
            write!(f, "(")?;
            fmt_chain(compound, f)?;
            write!(f, ")")
        }
        compound => fmt_chain(compound, f),
    }
}

fn fmt_chain(node: &SpecNode, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match node {
        SpecNode::Column(col) => write!(f, "{}", col.name),
        SpecNode::Join(op) => {
            fmt_node(&op.left, f, true)?;
            write!(f, " {} ", op.ty.token())?;
            fmt_node(&op.right, f, false)
        }
        SpecNode::InnerJoins(children) => {
            for (i, child) in children.iter().enumerate() {
                if i > 0 {
                    write!(f, " : ")?;
                }
                fmt_node(child, f, i == 0)?;
            }
            Ok(())
        }
        SpecNode::FullJoin(fj) => {
            fmt_node(&fj.op.left, f, true)?;
            write!(f, " {} ", fj.op.ty.token())?;
            fmt_node(&fj.op.right, f, false)
        }
    }
}
