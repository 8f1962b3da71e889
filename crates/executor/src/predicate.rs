//! Compiled predicate evaluation over join rows.
//!
//! Compilation resolves every dotted column path against the join-row layout
//! once; evaluation then short-circuits through the boolean tree. A null
//! anywhere on a path prefix fails the enclosing comparison, terminal nulls
//! follow the value comparison rules.

use common::{DbError, DbResult};
use filter::{CompareOp, Operand, RowFilter};
use planner::{JoinLayout, ResolvedPath};
use storage::compare_values;
use types::Value;

use crate::row::{JoinRow, PathValue};

#[derive(Debug)]
enum Node {
    True,
    False,
    And(Vec<Node>),
    Or(Vec<Node>),
    Cmp {
        lhs: ResolvedPath,
        op: CompareOp,
        rhs: Rhs,
    },
}

#[derive(Debug)]
enum Rhs {
    /// Zero-based index into the driver's argument array.
    Arg(usize),
    Col(ResolvedPath),
    Null,
}

/// A filter compiled against one join-row layout.
#[derive(Debug)]
pub struct Predicate {
    root: Node,
}

impl Predicate {
    pub fn compile(filter: &RowFilter, layout: &JoinLayout) -> DbResult<Predicate> {
        Ok(Predicate {
            root: compile_node(filter, layout)?,
        })
    }

    pub fn eval(&self, row: &JoinRow, args: &[Value]) -> DbResult<bool> {
        eval_node(&self.root, row, args)
    }
}

fn compile_node(filter: &RowFilter, layout: &JoinLayout) -> DbResult<Node> {
    match filter {
        RowFilter::True => Ok(Node::True),
        RowFilter::False => Ok(Node::False),
        RowFilter::And(children) => Ok(Node::And(
            children
                .iter()
                .map(|c| compile_node(c, layout))
                .collect::<DbResult<Vec<_>>>()?,
        )),
        RowFilter::Or(children) => Ok(Node::Or(
            children
                .iter()
                .map(|c| compile_node(c, layout))
                .collect::<DbResult<Vec<_>>>()?,
        )),
        RowFilter::Compare(cmp) => {
            let lhs = layout.resolve(&cmp.column)?;
            let rhs = match &cmp.rhs {
                Operand::Null => Rhs::Null,
                Operand::Arg(n) => Rhs::Arg(n.unsigned_abs() as usize - 1),
                Operand::Column(path) => Rhs::Col(layout.resolve(path)?),
            };
            Ok(Node::Cmp {
                lhs,
                op: cmp.op,
                rhs,
            })
        }
    }
}

fn eval_node(node: &Node, row: &JoinRow, args: &[Value]) -> DbResult<bool> {
    match node {
        Node::True => Ok(true),
        Node::False => Ok(false),
        Node::And(children) => {
            for child in children {
                if !eval_node(child, row, args)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Node::Or(children) => {
            for child in children {
                if eval_node(child, row, args)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Node::Cmp { lhs, op, rhs } => eval_compare(lhs, *op, rhs, row, args),
    }
}

fn eval_compare(
    lhs: &ResolvedPath,
    op: CompareOp,
    rhs: &Rhs,
    row: &JoinRow,
    args: &[Value],
) -> DbResult<bool> {
    let left = match row.lookup(lhs) {
        PathValue::NullPrefix => return Ok(false),
        PathValue::Slot { null } => {
            // Whole-slot references only support null tests.
            return match (op, rhs) {
                (CompareOp::Eq, Rhs::Null) => Ok(null),
                (CompareOp::Ne, Rhs::Null) => Ok(!null),
                _ => Err(DbError::Predicate(
                    "a whole source can only be compared against null".into(),
                )),
            };
        }
        PathValue::Value(value) => value,
    };

    let right = match rhs {
        Rhs::Null => &Value::Null,
        Rhs::Arg(idx) => args.get(*idx).ok_or(DbError::TooFewArguments {
            required: *idx + 1,
            supplied: args.len(),
        })?,
        Rhs::Col(path) => match row.lookup(path) {
            PathValue::NullPrefix => return Ok(false),
            PathValue::Slot { null: true } => &Value::Null,
            PathValue::Slot { null: false } => {
                return Err(DbError::Predicate(
                    "cannot compare a column against a whole source".into(),
                ));
            }
            PathValue::Value(value) => value,
        },
    };

    compare_values(left, op, right)
}
