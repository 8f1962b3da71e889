//! The nested-loops join driver.
//!
//! A `JoinScanner` executes one planned spec as a resumable nested-loops
//! join over per-table scanners:
//!
//! ```text
//! PlannedSpec
//!     ↓
//! build level tree (one level per source, compiled predicates)
//!     ↓
//! advance(jump_in = false) → position on the first accepted row
//!     ↓
//! step() → advance(jump_in = true) resumes at the innermost level
//!     ↓
//! close() → release every scanner
//! ```
//!
//! Scanners follow the table-scanner contract: freshly constructed they are
//! positioned on their first row, `step` advances, `row` peeks. Every yielded
//! row satisfies the plan's final residual filter.

mod level;
mod predicate;
mod row;
mod union;

pub use predicate::Predicate;
pub use row::{JoinRow, PathValue, SlotValue};
pub use union::UnionCursor;

use std::sync::Arc;

use common::{DbError, DbResult};
use level::{Cx, LevelNode, build};
use plan::QueryPlan;
use planner::{JoinLayout, PlannedSpec};
use storage::Transaction;
use types::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Active,
    Closed,
}

/// Streaming, restartable cursor over the rows of one planned join query.
pub struct JoinScanner {
    plan: Arc<PlannedSpec>,
    root: LevelNode,
    residual: Option<Predicate>,
    txn: Arc<dyn Transaction>,
    args: Vec<Value>,
    row: Option<JoinRow>,
    state: State,
}

impl std::fmt::Debug for JoinScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinScanner").finish_non_exhaustive()
    }
}

impl JoinScanner {
    /// Open a scanner, copying the caller's arguments into a driver-owned
    /// array sized for the planner's allocations, and position it on the
    /// first accepted row.
    pub fn new(
        plan: Arc<PlannedSpec>,
        txn: Arc<dyn Transaction>,
        first: Option<JoinRow>,
        args: &[Value],
    ) -> DbResult<JoinScanner> {
        if args.len() < plan.user_args {
            return Err(DbError::TooFewArguments {
                required: plan.user_args,
                supplied: args.len(),
            });
        }
        let mut owned = args.to_vec();
        if owned.len() < plan.total_args {
            owned.resize(plan.total_args, Value::Null);
        }

        let row = match first {
            Some(row) => {
                check_layout(row.layout(), &plan.layout)?;
                row
            }
            None => JoinRow::new(plan.layout.clone()),
        };

        let root = build(&plan.root, &plan.layout)?;
        let residual = match plan.residual.is_true() {
            true => None,
            false => Some(Predicate::compile(&plan.residual, &plan.layout)?),
        };

        let mut scanner = JoinScanner {
            plan,
            root,
            residual,
            txn,
            args: owned,
            row: Some(row),
            state: State::Active,
        };
        scanner.drive(false)?;
        Ok(scanner)
    }

    /// The current row, or `None` once the stream ends.
    pub fn row(&self) -> Option<&JoinRow> {
        self.row.as_ref()
    }

    /// Advance to the next accepted row.
    pub fn step(&mut self) -> DbResult<Option<&JoinRow>> {
        if self.state == State::Closed || self.row.is_none() {
            self.row = None;
            return Ok(None);
        }
        self.drive(true)?;
        Ok(self.row.as_ref())
    }

    /// Advance using a caller-supplied row instance. Slots the instance left
    /// null are restored from the live per-level scanners before resuming.
    pub fn step_with(&mut self, row: JoinRow) -> DbResult<Option<&JoinRow>> {
        if self.state == State::Closed || self.row.is_none() {
            self.row = None;
            return Ok(None);
        }
        check_layout(row.layout(), &self.plan.layout)?;
        self.row = Some(row);
        {
            let current = match self.row.as_mut() {
                Some(r) => r,
                None => return Ok(None),
            };
            let mut cx = Cx {
                row: current,
                args: &mut self.args,
                txn: &self.txn,
            };
            self.root.restore(&mut cx);
        }
        self.drive(true)?;
        Ok(self.row.as_ref())
    }

    /// Release all per-level scanners and end the stream. Idempotent.
    pub fn close(&mut self) {
        if self.state == State::Closed {
            return;
        }
        self.state = State::Closed;
        self.root.close();
        self.row = None;
    }

    /// Diagnostic plan for this scanner's query.
    pub fn query_plan(&self) -> DbResult<QueryPlan> {
        self.plan.query_plan()
    }

    fn drive(&mut self, jump_in: bool) -> DbResult<()> {
        let mut jump = jump_in;
        loop {
            let advanced = {
                let Some(current) = self.row.as_mut() else {
                    return Ok(());
                };
                let mut cx = Cx {
                    row: current,
                    args: &mut self.args,
                    txn: &self.txn,
                };
                self.root.advance(&mut cx, jump)
            };
            match advanced {
                Err(err) => {
                    // Release every scanner before re-raising.
                    self.root.close();
                    self.row = None;
                    self.state = State::Closed;
                    return Err(err);
                }
                Ok(false) => {
                    self.row = None;
                    return Ok(());
                }
                Ok(true) => {
                    let accepted = match (&self.residual, self.row.as_ref()) {
                        (Some(residual), Some(current)) => residual.eval(current, &self.args),
                        _ => Ok(true),
                    };
                    match accepted {
                        Err(err) => {
                            self.root.close();
                            self.row = None;
                            self.state = State::Closed;
                            return Err(err);
                        }
                        Ok(true) => return Ok(()),
                        Ok(false) => jump = true,
                    }
                }
            }
        }
    }
}

impl Drop for JoinScanner {
    fn drop(&mut self) {
        self.close();
    }
}

fn check_layout(given: &Arc<JoinLayout>, expected: &Arc<JoinLayout>) -> DbResult<()> {
    if Arc::ptr_eq(given, expected) {
        return Ok(());
    }
    let same = given.len() == expected.len()
        && given
            .slots()
            .iter()
            .zip(expected.slots())
            .all(|(a, b)| a.name == b.name);
    if same {
        Ok(())
    } else {
        Err(DbError::TypeMismatch(
            "row instance does not match this join's layout".into(),
        ))
    }
}
