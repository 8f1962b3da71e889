//! Per-level execution state for the nested-loops driver.
//!
//! Each planned node becomes one level: table levels own a scanner, join
//! levels own the outer/anti bookkeeping, full-join levels own a union
//! cursor over their two split halves. `advance` is the single re-entrant
//! operation: `jump_in = false` starts the subtree fresh for the current
//! outer bindings, `jump_in = true` resumes at the innermost position.

use std::sync::Arc;

use catalog::RowSchema;
use common::{DbError, DbResult};
use filter::RowFilter;
use hashbrown::HashMap;
use planner::{
    JoinLayout, PlannedColumn, PlannedFullJoin, PlannedJoin, PlannedNode, PlannedSpec,
    ResolvedPath,
};
use spec::JoinType;
use storage::{Scanner, Table, Transaction};
use types::Value;

use crate::JoinScanner;
use crate::predicate::Predicate;
use crate::row::JoinRow;
use crate::union::UnionCursor;

pub(crate) struct Cx<'a> {
    pub row: &'a mut JoinRow,
    pub args: &'a mut Vec<Value>,
    pub txn: &'a Arc<dyn Transaction>,
}

pub(crate) enum LevelNode {
    Column(ColumnLevel),
    Join(Box<JoinLevel>),
    Full(FullLevel),
}

/// Build the level tree for a planned spec.
pub(crate) fn build(node: &PlannedNode, layout: &JoinLayout) -> DbResult<LevelNode> {
    match node {
        PlannedNode::Column(col) => Ok(LevelNode::Column(ColumnLevel::new(col, layout)?)),
        PlannedNode::Full(full) => Ok(LevelNode::Full(FullLevel::new(full, layout)?)),
        PlannedNode::Join(join) => Ok(LevelNode::Join(Box::new(JoinLevel::new(join, layout)?))),
    }
}

fn resolve_assignments(
    assignments: &[planner::ArgAssignment],
    layout: &JoinLayout,
) -> DbResult<Vec<(usize, ResolvedPath)>> {
    assignments
        .iter()
        .map(|a| Ok((a.arg as usize - 1, layout.resolve(&a.path)?)))
        .collect()
}

fn compile_optional(filter: &Option<RowFilter>, layout: &JoinLayout) -> DbResult<Option<Predicate>> {
    filter
        .as_ref()
        .map(|f| Predicate::compile(f, layout))
        .transpose()
}

impl LevelNode {
    pub(crate) fn advance(&mut self, cx: &mut Cx, jump_in: bool) -> DbResult<bool> {
        match self {
            LevelNode::Column(level) => level.advance(cx, jump_in),
            LevelNode::Full(level) => level.advance(cx, jump_in),
            LevelNode::Join(level) => level.advance(cx, jump_in),
        }
    }

    /// Null out every slot this subtree binds.
    fn clear(&self, cx: &mut Cx) {
        match self {
            LevelNode::Column(level) => cx.row.clear_slot(level.slot),
            LevelNode::Full(level) => cx.row.clear_slot(level.slot),
            LevelNode::Join(level) => {
                level.left.clear(cx);
                level.right.clear(cx);
            }
        }
    }

    /// Release every scanner below this node. Safe to call repeatedly.
    pub(crate) fn close(&mut self) {
        match self {
            LevelNode::Column(level) => {
                if let Some(mut scanner) = level.scanner.take() {
                    scanner.close();
                }
            }
            LevelNode::Full(level) => {
                if let Some(mut cursor) = level.cursor.take() {
                    cursor.close();
                }
            }
            LevelNode::Join(level) => {
                level.left.close();
                level.right.close();
            }
        }
    }

    /// Re-synchronize join-row slots from live scanners after the caller
    /// stepped with a foreign row instance: a null slot whose scanner still
    /// holds a row gets a clone of that row.
    pub(crate) fn restore(&self, cx: &mut Cx) {
        match self {
            LevelNode::Column(level) => {
                if cx.row.slot(level.slot).is_none() {
                    if let Some(row) = level.scanner.as_ref().and_then(|s| s.row()) {
                        cx.row.set_row(level.slot, row.clone());
                    }
                }
            }
            LevelNode::Full(level) => {
                if cx.row.slot(level.slot).is_none() {
                    if let Some(row) = level.cursor.as_ref().and_then(|c| c.row()) {
                        cx.row.set_nested(level.slot, row.clone());
                    }
                }
            }
            LevelNode::Join(level) => {
                level.left.restore(cx);
                level.right.restore(cx);
            }
        }
    }
}

// ---------------------------------------------------------------------------

/// The effective scanner filter for one combination of null-bound arguments:
/// `None` means the level is provably empty and no scanner is opened.
type FilterVariant = Option<String>;

pub(crate) struct ColumnLevel {
    slot: usize,
    table: Arc<dyn Table>,
    schema: Arc<RowSchema>,
    filter: Option<RowFilter>,
    null_args: Vec<u32>,
    variants: HashMap<u64, FilterVariant>,
    remainder: Option<Predicate>,
    assignments: Vec<(usize, ResolvedPath)>,
    exists_probe: bool,
    scanner: Option<Box<dyn Scanner>>,
}

impl ColumnLevel {
    fn new(col: &PlannedColumn, layout: &JoinLayout) -> DbResult<ColumnLevel> {
        Ok(ColumnLevel {
            slot: col.slot,
            table: col.table.clone(),
            schema: col.schema.clone(),
            filter: col.filter.clone(),
            null_args: col.null_args.clone(),
            variants: HashMap::new(),
            remainder: compile_optional(&col.remainder, layout)?,
            assignments: resolve_assignments(&col.assignments, layout)?,
            exists_probe: col.exists_probe,
            scanner: None,
        })
    }

    fn advance(&mut self, cx: &mut Cx, jump_in: bool) -> DbResult<bool> {
        if self.exists_probe {
            if jump_in {
                return Ok(false);
            }
            cx.row.clear_slot(self.slot);
            return match self.effective_filter(cx.args)? {
                None => Ok(false),
                Some(text) => self
                    .table
                    .any_rows(cx.txn.as_ref(), text.as_deref(), cx.args),
            };
        }

        if jump_in {
            match self.scanner.as_mut() {
                Some(scanner) => scanner.step()?,
                None => {
                    cx.row.clear_slot(self.slot);
                    return Ok(false);
                }
            }
        } else {
            self.open(cx)?;
        }

        loop {
            let next = self.scanner.as_ref().and_then(|s| s.row()).cloned();
            let Some(row) = next else {
                cx.row.clear_slot(self.slot);
                return Ok(false);
            };
            cx.row.set_row(self.slot, row);

            if let Some(remainder) = &self.remainder {
                if !remainder.eval(cx.row, cx.args)? {
                    if let Some(scanner) = self.scanner.as_mut() {
                        scanner.step()?;
                    }
                    continue;
                }
            }

            for (idx, path) in &self.assignments {
                cx.args[*idx] = cx.row.value_at(path);
            }
            return Ok(true);
        }
    }

    fn open(&mut self, cx: &mut Cx) -> DbResult<()> {
        if let Some(mut old) = self.scanner.take() {
            old.close();
        }
        match self.effective_filter(cx.args)? {
            None => {}
            Some(text) => {
                self.scanner = Some(self.table.new_scanner(
                    cx.txn.as_ref(),
                    text.as_deref(),
                    cx.args,
                )?);
            }
        }
        Ok(())
    }

    /// Pick the filter variant for the current argument bindings. Arguments
    /// flagged negative by the planner substitute the null literal when the
    /// bound value is null; a variant that folds to `false` against the
    /// table's nullability skips the scan entirely.
    fn effective_filter(&mut self, args: &[Value]) -> DbResult<Option<FilterVariant>> {
        let Some(filter) = &self.filter else {
            return Ok(Some(None));
        };

        let mut mask = 0u64;
        for (bit, &arg) in self.null_args.iter().enumerate() {
            let bound = args.get(arg as usize - 1);
            if bound.is_none_or(Value::is_null) {
                mask |= 1 << bit;
            }
        }

        if let Some(found) = self.variants.get(&mask) {
            return Ok(if found.is_some() { Some(found.clone()) } else { None });
        }

        let mut variant = filter.clone();
        for (bit, &arg) in self.null_args.iter().enumerate() {
            if mask & (1 << bit) != 0 {
                variant = variant.argument_as_null(arg);
            }
        }
        let variant = variant.replace_arguments(&|n| n.abs());
        let variant = fold_null_tests(&variant, &self.schema);

        let entry: FilterVariant = if variant.is_false() {
            None
        } else {
            Some(variant.to_string())
        };
        self.variants.insert(mask, entry.clone());
        Ok(if entry.is_some() { Some(entry) } else { None })
    }
}

/// Fold null comparisons the table can never satisfy: a non-nullable column
/// is never `== null` and always `!= null`.
fn fold_null_tests(filter: &RowFilter, schema: &RowSchema) -> RowFilter {
    filter.map_compares(&mut |cmp| {
        if matches!(cmp.rhs, filter::Operand::Null) && cmp.column.is_simple() {
            if let Some(info) = schema.column(cmp.column.head()) {
                if !info.nullable {
                    return match cmp.op {
                        filter::CompareOp::Eq => RowFilter::False,
                        filter::CompareOp::Ne => RowFilter::True,
                        _ => RowFilter::Compare(cmp.clone()),
                    };
                }
            }
        }
        RowFilter::Compare(cmp.clone())
    })
}

// ---------------------------------------------------------------------------

pub(crate) struct JoinLevel {
    ty: JoinType,
    left: LevelNode,
    right: LevelNode,
    /// Set once the right subtree produced a row for the current left tuple.
    ready: bool,
    predicate: Option<Predicate>,
}

impl JoinLevel {
    fn new(join: &PlannedJoin, layout: &JoinLayout) -> DbResult<JoinLevel> {
        match join.ty {
            JoinType::Inner | JoinType::Straight | JoinType::LeftOuter | JoinType::LeftAnti => {}
            other => {
                return Err(DbError::UnsupportedJoinType(other.label().to_string()));
            }
        }
        Ok(JoinLevel {
            ty: join.ty,
            left: build(&join.left, layout)?,
            right: build(&join.right, layout)?,
            ready: false,
            predicate: compile_optional(&join.predicate, layout)?,
        })
    }

    fn advance(&mut self, cx: &mut Cx, jump_in: bool) -> DbResult<bool> {
        if jump_in {
            match self.ty {
                JoinType::Inner | JoinType::Straight => {
                    if self.right.advance(cx, true)? {
                        return Ok(true);
                    }
                }
                JoinType::LeftOuter => {
                    if self.right.advance(cx, true)? {
                        self.ready = true;
                        return Ok(true);
                    }
                    if !self.ready {
                        // The right side never matched this left tuple: emit
                        // it once, null-padded, when the predicate allows.
                        self.right.clear(cx);
                        self.ready = true;
                        if self.pass_predicate(cx)? {
                            return Ok(true);
                        }
                    }
                }
                // An emitted anti row finishes its left tuple.
                JoinType::LeftAnti => {}
                other => {
                    return Err(DbError::UnsupportedJoinType(other.label().to_string()));
                }
            }
        } else {
            if !self.left.advance(cx, false)? {
                return Ok(false);
            }
            if self.bind_right(cx)? {
                return Ok(true);
            }
        }

        loop {
            if !self.left.advance(cx, true)? {
                return Ok(false);
            }
            if self.bind_right(cx)? {
                return Ok(true);
            }
        }
    }

    /// Run the right subtree fresh against the current left tuple.
    fn bind_right(&mut self, cx: &mut Cx) -> DbResult<bool> {
        self.ready = false;
        match self.ty {
            JoinType::Inner | JoinType::Straight => self.right.advance(cx, false),
            JoinType::LeftOuter => {
                if self.right.advance(cx, false)? {
                    self.ready = true;
                    return Ok(true);
                }
                self.right.clear(cx);
                self.ready = true;
                self.pass_predicate(cx)
            }
            JoinType::LeftAnti => {
                if self.right.advance(cx, false)? {
                    // A match disqualifies the tuple.
                    self.right.close();
                    return Ok(false);
                }
                self.right.clear(cx);
                self.pass_predicate(cx)
            }
            other => Err(DbError::UnsupportedJoinType(other.label().to_string())),
        }
    }

    fn pass_predicate(&self, cx: &mut Cx) -> DbResult<bool> {
        match &self.predicate {
            Some(predicate) => predicate.eval(cx.row, cx.args),
            None => Ok(true),
        }
    }
}

// ---------------------------------------------------------------------------

pub(crate) struct FullLevel {
    slot: usize,
    first: Arc<PlannedSpec>,
    second: Arc<PlannedSpec>,
    remainder: Option<Predicate>,
    assignments: Vec<(usize, ResolvedPath)>,
    cursor: Option<Box<UnionCursor>>,
}

impl FullLevel {
    fn new(full: &PlannedFullJoin, layout: &JoinLayout) -> DbResult<FullLevel> {
        Ok(FullLevel {
            slot: full.slot,
            first: full.first.clone(),
            second: full.second.clone(),
            remainder: compile_optional(&full.remainder, layout)?,
            assignments: resolve_assignments(&full.assignments, layout)?,
            cursor: None,
        })
    }

    fn advance(&mut self, cx: &mut Cx, jump_in: bool) -> DbResult<bool> {
        if jump_in {
            match self.cursor.as_mut() {
                Some(cursor) => cursor.step()?,
                None => {
                    cx.row.clear_slot(self.slot);
                    return Ok(false);
                }
            }
        } else {
            if let Some(mut old) = self.cursor.take() {
                old.close();
            }
            let first = JoinScanner::new(self.first.clone(), cx.txn.clone(), None, cx.args)?;
            let second = JoinScanner::new(self.second.clone(), cx.txn.clone(), None, cx.args)?;
            self.cursor = Some(Box::new(UnionCursor::new(first, second)));
        }

        loop {
            let next = self.cursor.as_ref().and_then(|c| c.row()).cloned();
            let Some(row) = next else {
                cx.row.clear_slot(self.slot);
                return Ok(false);
            };
            cx.row.set_nested(self.slot, row);

            if let Some(remainder) = &self.remainder {
                if !remainder.eval(cx.row, cx.args)? {
                    if let Some(cursor) = self.cursor.as_mut() {
                        cursor.step()?;
                    }
                    continue;
                }
            }

            for (idx, path) in &self.assignments {
                cx.args[*idx] = cx.row.value_at(path);
            }
            return Ok(true);
        }
    }
}
