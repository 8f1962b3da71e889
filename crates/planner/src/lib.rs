//! The join planner.
//!
//! Planning turns a normalized join spec plus one overall predicate into an
//! immutable `PlannedSpec` the driver can execute:
//!
//! ```text
//! JoinSpec + RowFilter
//!     ↓
//! deep copy into mutable planned sources
//!     ↓
//! distribute CNF conjuncts across levels (execution order)
//!     ↓
//! reorder each inner-join group (Heap's algorithm, greedy past the bound)
//!     ↓
//! hoist column-to-column comparisons into fresh argument slots
//!     ↓
//! residual filter + lowering to binary planned joins
//! ```
//!
//! Full joins are planned here as well: each wrapped full join is split into
//! a left-outer and a right-anti half, and both halves are planned against
//! the same pushed-down query so the driver can run them as a disjoint union.

mod layout;
mod score;
#[cfg(test)]
mod tests;

pub use layout::{JoinLayout, ResolvedPath, SlotDef, SlotKind};

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use ahash::RandomState;
use catalog::RowSchema;
use common::{DbError, DbResult};
use filter::{ColumnPath, CompareOp, Operand, RowFilter};
use hashbrown::HashMap;
use plan::{Level, QueryPlan};
use score::LevelScore;
use spec::{JoinOp, JoinSpec, JoinType, SpecNode, try_split_full_join};
use storage::{Cardinality, Table};

type Map<K, V> = HashMap<K, V, RandomState>;

/// Planner tuning knobs.
///
/// # Example
/// ```
/// use planner::PlannerConfig;
///
/// let config = PlannerConfig::builder().max_permute(4).build();
/// assert_eq!(config.max_permute, 4);
/// ```
#[derive(Clone, Debug, bon::Builder)]
pub struct PlannerConfig {
    /// Inner-join groups up to this size are ordered exhaustively; larger
    /// groups fall back to a greedy best-first ordering.
    #[builder(default = 8)]
    pub max_permute: usize,
    /// Clause budget for conversion to conjunctive normal form; past it the
    /// predicate is distributed as written.
    #[builder(default = 64)]
    pub max_cnf_clauses: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_permute: 8,
            max_cnf_clauses: 64,
        }
    }
}

/// After this level matches, copy the value at `path` into argument `arg`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgAssignment {
    pub arg: u32,
    pub path: ColumnPath,
}

impl ArgAssignment {
    pub fn display(&self) -> String {
        format!("?{} = {}", self.arg, self.path)
    }
}

/// A planned leaf table level.
#[derive(Clone)]
pub struct PlannedColumn {
    pub name: String,
    pub table: Arc<dyn Table>,
    pub schema: Arc<RowSchema>,
    pub slot: usize,
    /// Filter pushed into the scanner, with columns relative to the table.
    /// Negative argument indices flag comparisons that need the null-aware
    /// variant when the bound value is null.
    pub filter: Option<RowFilter>,
    /// Argument magnitudes that appear negated in `filter`.
    pub null_args: Vec<u32>,
    /// Checked against the join row after a scanner row materializes.
    pub remainder: Option<RowFilter>,
    /// Checked when this level is null-padded by an outer/anti join.
    pub predicate: Option<RowFilter>,
    pub assignments: Vec<ArgAssignment>,
    /// Earlier sources whose values feed this level's scanner arguments.
    pub arg_sources: Vec<String>,
    /// Last-source left-anti optimization: probe `any_rows` instead of
    /// opening a scanner.
    pub exists_probe: bool,
}

/// A planned full join: one pseudo-source executed as a disjoint union of
/// the two split halves.
#[derive(Clone)]
pub struct PlannedFullJoin {
    pub name: String,
    pub slot: usize,
    pub layout: Arc<JoinLayout>,
    pub first: Arc<PlannedSpec>,
    pub second: Arc<PlannedSpec>,
    pub remainder: Option<RowFilter>,
    pub predicate: Option<RowFilter>,
    pub assignments: Vec<ArgAssignment>,
    pub arg_sources: Vec<String>,
}

/// A planned binary join operator. Only `Inner`, `Straight`, `LeftOuter`,
/// and `LeftAnti` survive planning.
#[derive(Clone)]
pub struct PlannedJoin {
    pub ty: JoinType,
    pub left: PlannedNode,
    pub right: PlannedNode,
    /// Weakened predicate evaluated when the right side is null-padded.
    pub predicate: Option<RowFilter>,
}

#[derive(Clone)]
pub enum PlannedNode {
    Column(PlannedColumn),
    Join(Box<PlannedJoin>),
    Full(Box<PlannedFullJoin>),
}

/// The output of planning: an executable tree plus the final residual.
#[derive(Clone)]
pub struct PlannedSpec {
    pub root: PlannedNode,
    /// Conjuncts no level consumed; checked against the completed join row.
    pub residual: RowFilter,
    pub layout: Arc<JoinLayout>,
    /// Argument slots the driver must provide, planner allocations included.
    pub total_args: usize,
    /// Highest argument index the caller's query referenced.
    pub user_args: usize,
}

impl std::fmt::Debug for PlannedSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlannedSpec").finish_non_exhaustive()
    }
}

/// Plan a query against a join spec.
pub fn plan(spec: &JoinSpec, query: &RowFilter, config: &PlannerConfig) -> DbResult<PlannedSpec> {
    let mut next_arg = query.max_argument() + 1;
    plan_tree(spec.root().clone(), query.clone(), config, &mut next_arg)
}

/// Plan one spec tree. Shared by the top-level entry and full-join halves;
/// `next_arg` threads the argument allocator through nested plans.
fn plan_tree(
    root: SpecNode,
    query: RowFilter,
    config: &PlannerConfig,
    next_arg: &mut u32,
) -> DbResult<PlannedSpec> {
    let normalized = root.clone().to_left_join();

    let mut padded = HashSet::new();
    collect_padded(&normalized, false, &mut padded);
    // Layout order follows the original spec text, not the normalized or
    // reordered tree, so split full-join halves agree on slot positions.
    let layout = Arc::new(build_layout(&root, &padded));

    query.check_columns(|path| layout.resolve(path).is_ok())?;

    let mut build = to_build(&normalized)?;

    // Phase 2 + 3: distribute the predicate, reordering inner-join groups.
    let distributed = query
        .cnf(config.max_cnf_clauses)
        .unwrap_or_else(|| query.clone());
    let mut available = BTreeSet::new();
    let residual = distribute(&mut build, distributed, &mut available, config)?;

    // Phase 4: hoist column-to-column comparisons into argument slots.
    let pending = {
        let mut cx = HoistCx {
            layout: &layout,
            next_arg: &mut *next_arg,
            pending: Vec::new(),
            owner: Map::default(),
            available: BTreeSet::new(),
        };
        hoist(&mut build, &mut cx)?;
        cx.pending
    };
    apply_assignments(&mut build, pending);

    let mut planned_root = lower(build, &layout, config, next_arg)?;
    mark_exists_probe(&mut planned_root);

    Ok(PlannedSpec {
        root: planned_root,
        residual,
        layout,
        total_args: (*next_arg - 1) as usize,
        user_args: query.max_argument() as usize,
    })
}

// ---------------------------------------------------------------------------
// Build tree: a mutable copy of the spec the phases work on.

#[derive(Clone)]
enum BKind {
    Col {
        table: Arc<dyn Table>,
        schema: Arc<RowSchema>,
    },
    Full {
        op: JoinOp,
    },
}

#[derive(Clone)]
struct BSource {
    name: String,
    /// Column names this source binds: itself for a table, the leaf column
    /// names for a full join.
    names: Vec<String>,
    kind: BKind,
    extracted: RowFilter,
    filter: Option<RowFilter>,
    remainder: Option<RowFilter>,
    predicate: Option<RowFilter>,
    assignments: Vec<ArgAssignment>,
    arg_sources: BTreeSet<String>,
}

impl BSource {
    fn binds(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }
}

#[derive(Clone)]
enum BNode {
    Source(BSource),
    Join {
        ty: JoinType,
        left: Box<BNode>,
        right: Box<BNode>,
    },
    Group(Vec<BNode>),
}

fn to_build(node: &SpecNode) -> DbResult<BNode> {
    match node {
        SpecNode::Column(col) => Ok(BNode::Source(new_source(
            col.name.clone(),
            vec![col.name.clone()],
            BKind::Col {
                table: col.table.clone(),
                schema: col.schema.clone(),
            },
        ))),
        SpecNode::FullJoin(fj) => {
            let names = fj
                .op
                .left
                .columns()
                .chain(fj.op.right.columns())
                .map(|c| c.name.clone())
                .collect();
            Ok(BNode::Source(new_source(
                fj.name.clone(),
                names,
                BKind::Full { op: fj.op.clone() },
            )))
        }
        SpecNode::Join(op) => {
            if op.ty.is_right() {
                return Err(DbError::UnsupportedJoinType(op.ty.label().to_string()));
            }
            Ok(BNode::Join {
                ty: op.ty,
                left: Box::new(to_build(&op.left)?),
                right: Box::new(to_build(&op.right)?),
            })
        }
        SpecNode::InnerJoins(children) => Ok(BNode::Group(
            children
                .iter()
                .map(to_build)
                .collect::<DbResult<Vec<_>>>()?,
        )),
    }
}

fn new_source(name: String, names: Vec<String>, kind: BKind) -> BSource {
    BSource {
        name,
        names,
        kind,
        extracted: RowFilter::True,
        filter: None,
        remainder: None,
        predicate: None,
        assignments: Vec::new(),
        arg_sources: BTreeSet::new(),
    }
}

/// Names of sources that may be null-padded at run time.
fn collect_padded(node: &SpecNode, padding: bool, out: &mut HashSet<String>) {
    match node {
        SpecNode::Column(col) => {
            if padding {
                out.insert(col.name.clone());
            }
        }
        SpecNode::InnerJoins(children) => {
            for child in children {
                collect_padded(child, padding, out);
            }
        }
        SpecNode::Join(op) => {
            collect_padded(&op.left, padding, out);
            let pads_right = matches!(op.ty, JoinType::LeftOuter | JoinType::LeftAnti);
            collect_padded(&op.right, padding || pads_right, out);
        }
        SpecNode::FullJoin(fj) => {
            if padding {
                out.insert(fj.name.clone());
            }
            // Both operands of a full join can be padded by the union halves.
            collect_padded(&fj.op.left, true, out);
            collect_padded(&fj.op.right, true, out);
        }
    }
}

fn build_layout(root: &SpecNode, padded: &HashSet<String>) -> JoinLayout {
    let mut slots = Vec::new();
    for source in root.sources() {
        match source {
            spec::SourceRef::Column(col) => slots.push(SlotDef {
                name: col.name.clone(),
                kind: SlotKind::Table(col.schema.clone()),
                nullable: col.nullable || padded.contains(&col.name),
            }),
            spec::SourceRef::Full(fj) => {
                // The wrapped op is normalized first so the nested slot order
                // matches the layouts of the split halves, which are planned
                // from the normalized children.
                let inner_root = SpecNode::Join(Box::new(fj.op.clone())).to_left_join();
                let inner = build_layout(&inner_root, padded);
                slots.push(SlotDef {
                    name: fj.name.clone(),
                    kind: SlotKind::Nested(Arc::new(inner)),
                    nullable: padded.contains(&fj.name),
                });
            }
        }
    }
    JoinLayout::new(slots)
}

// ---------------------------------------------------------------------------
// Phase 2 + 3: predicate distribution and inner-join reordering.

fn distribute(
    node: &mut BNode,
    residual: RowFilter,
    available: &mut BTreeSet<String>,
    config: &PlannerConfig,
) -> DbResult<RowFilter> {
    match node {
        BNode::Source(src) => {
            let (extracted, rest) = residual.split(|conjunct| {
                let sources = conjunct.sources();
                sources.iter().any(|s| src.binds(s))
                    && sources.iter().all(|s| src.binds(s) || available.contains(s))
            });
            src.extracted = extracted;
            available.extend(src.names.iter().cloned());
            Ok(rest)
        }
        BNode::Join { left, right, .. } => {
            let rest = distribute(left, residual, available, config)?;
            distribute(right, rest, available, config)
        }
        BNode::Group(children) => {
            reorder_group(children, residual, available, config)
        }
    }
}

/// Try candidate orderings of one inner-join group, keeping the best score.
/// The available set snapshots before each trial and commits to the winner.
fn reorder_group(
    children: &mut Vec<BNode>,
    residual: RowFilter,
    available: &mut BTreeSet<String>,
    config: &PlannerConfig,
) -> DbResult<RowFilter> {
    struct Best {
        scores: Vec<LevelScore>,
        children: Vec<BNode>,
        available: BTreeSet<String>,
        rest: RowFilter,
    }

    let snapshot = available.clone();
    let mut best: Option<Best> = None;

    let mut consider = |order: &[usize]| -> DbResult<()> {
        let mut trial: Vec<BNode> = order.iter().map(|&i| children[i].clone()).collect();
        let mut avail = snapshot.clone();
        let mut rest = residual.clone();
        for child in trial.iter_mut() {
            rest = distribute(child, rest, &mut avail, config)?;
        }
        let mut scores = Vec::new();
        let mut score_avail = snapshot.clone();
        for child in &trial {
            score_nodes(child, &mut score_avail, &mut scores);
        }
        let better = match &best {
            Some(found) => scores > found.scores,
            None => true,
        };
        if better {
            best = Some(Best {
                scores,
                children: trial,
                available: avail,
                rest,
            });
        }
        Ok(())
    };

    if children.len() <= config.max_permute {
        heap_permutations(children.len(), &mut consider)?;
    } else {
        let order = greedy_order(children, &snapshot, &residual, config)?;
        consider(&order)?;
    }

    // A group always has at least one ordering, so a winner exists.
    let won = best.unwrap();
    *children = won.children;
    *available = won.available;
    Ok(won.rest)
}

/// Heap's algorithm: visit every permutation of `0..n`.
fn heap_permutations<F>(n: usize, visit: &mut F) -> DbResult<()>
where
    F: FnMut(&[usize]) -> DbResult<()>,
{
    let mut order: Vec<usize> = (0..n).collect();
    let mut counters = vec![0usize; n];
    visit(&order)?;
    let mut i = 0;
    while i < n {
        if counters[i] < i {
            if i % 2 == 0 {
                order.swap(0, i);
            } else {
                order.swap(counters[i], i);
            }
            visit(&order)?;
            counters[i] += 1;
            i = 0;
        } else {
            counters[i] = 0;
            i += 1;
        }
    }
    Ok(())
}

/// Best-first ordering for groups too large to permute exhaustively.
fn greedy_order(
    children: &[BNode],
    available: &BTreeSet<String>,
    residual: &RowFilter,
    config: &PlannerConfig,
) -> DbResult<Vec<usize>> {
    let mut remaining: Vec<usize> = (0..children.len()).collect();
    let mut order = Vec::with_capacity(children.len());
    let mut avail = available.clone();
    let mut rest = residual.clone();

    while !remaining.is_empty() {
        let mut best: Option<(Vec<LevelScore>, usize, BTreeSet<String>, RowFilter)> = None;
        for (pos, &idx) in remaining.iter().enumerate() {
            let mut trial = children[idx].clone();
            let mut trial_avail = avail.clone();
            let trial_rest = distribute(&mut trial, rest.clone(), &mut trial_avail, config)?;
            let mut scores = Vec::new();
            let mut score_avail = avail.clone();
            score_nodes(&trial, &mut score_avail, &mut scores);
            let better = match &best {
                Some((found, ..)) => scores > *found,
                None => true,
            };
            if better {
                best = Some((scores, pos, trial_avail, trial_rest));
            }
        }
        let (_, pos, chosen_avail, chosen_rest) = best.unwrap();
        order.push(remaining.remove(pos));
        avail = chosen_avail;
        rest = chosen_rest;
    }
    Ok(order)
}

/// Per-source ordering scores, in execution order.
fn score_nodes(node: &BNode, available: &mut BTreeSet<String>, out: &mut Vec<LevelScore>) {
    match node {
        BNode::Source(src) => {
            out.push(score_source(src, available));
            available.extend(src.names.iter().cloned());
        }
        BNode::Join { left, right, .. } => {
            score_nodes(left, available, out);
            score_nodes(right, available, out);
        }
        BNode::Group(children) => {
            for child in children {
                score_nodes(child, available, out);
            }
        }
    }
}

fn score_source(src: &BSource, available: &BTreeSet<String>) -> LevelScore {
    let filter = score::filter_score(&src.extracted, &src.names, available);
    match &src.kind {
        BKind::Col { table, schema } => LevelScore {
            key: score::key_match(&src.extracted, &src.name, schema, available),
            filter,
            one_row: table.cardinality() == Cardinality::AtMostOne,
            grouped: table.cardinality() == Cardinality::Grouped,
        },
        BKind::Full { .. } => LevelScore {
            key: 0,
            filter,
            one_row: false,
            grouped: false,
        },
    }
}

// ---------------------------------------------------------------------------
// Phase 4: argument propagation.

struct HoistCx<'a> {
    layout: &'a JoinLayout,
    next_arg: &'a mut u32,
    /// (producer source name, assignment) pairs to install after the walk.
    pending: Vec<(String, ArgAssignment)>,
    /// Bound column name -> owning source name.
    owner: Map<String, String>,
    available: BTreeSet<String>,
}

fn hoist(node: &mut BNode, cx: &mut HoistCx) -> DbResult<()> {
    match node {
        BNode::Source(src) => hoist_source(src, cx),
        BNode::Join { left, right, .. } => {
            hoist(left, cx)?;
            hoist(right, cx)
        }
        BNode::Group(children) => {
            for child in children {
                hoist(child, cx)?;
            }
            Ok(())
        }
    }
}

fn hoist_source(src: &mut BSource, cx: &mut HoistCx) -> DbResult<()> {
    let extracted = std::mem::replace(&mut src.extracted, RowFilter::True);

    // The padding predicate keeps only leaves this source can answer by
    // itself; cross-source leaves weaken to true so null-extended rows are
    // not rejected for values that never got bound.
    if !extracted.is_true() {
        let weakened = extracted.retain(
            &|cmp| {
                src.binds(cmp.column.head())
                    && match &cmp.rhs {
                        Operand::Column(path) => src.binds(path.head()),
                        Operand::Arg(_) | Operand::Null => true,
                    }
            },
            true,
        );
        if !weakened.is_true() {
            src.predicate = Some(weakened);
        }
    }

    let is_full = matches!(src.kind, BKind::Full { .. });
    let mut arg_sources = BTreeSet::new();
    let mut scanner = Vec::new();
    let mut remainder = Vec::new();
    for conjunct in extracted.into_conjuncts() {
        if conjunct_expressible(&conjunct, src, &cx.available) {
            scanner.push(convert_conjunct(
                &conjunct,
                &src.name,
                &src.names,
                is_full,
                cx,
                &mut arg_sources,
            )?);
        } else {
            remainder.push(conjunct);
        }
    }
    src.arg_sources.extend(arg_sources);

    let filter = RowFilter::and(scanner);
    if !filter.is_true() {
        src.filter = Some(filter);
    }
    let rest = RowFilter::and(remainder);
    if !rest.is_true() {
        src.remainder = Some(rest);
    }

    for name in &src.names {
        cx.owner.insert(name.clone(), src.name.clone());
        cx.available.insert(name.clone());
    }
    Ok(())
}

/// Can every leaf of this conjunct be answered by the source's scanner,
/// possibly after hoisting earlier-source columns into arguments?
fn conjunct_expressible(conjunct: &RowFilter, src: &BSource, available: &BTreeSet<String>) -> bool {
    match conjunct {
        RowFilter::True | RowFilter::False => true,
        RowFilter::And(children) | RowFilter::Or(children) => children
            .iter()
            .all(|c| conjunct_expressible(c, src, available)),
        RowFilter::Compare(cmp) => {
            let mine = src.binds(cmp.column.head());
            if cmp.column.is_simple() {
                // Whole-source comparison: answerable only against null, and
                // only for a source this level binds.
                return mine
                    && matches!(cmp.rhs, Operand::Null)
                    && matches!(cmp.op, CompareOp::Eq | CompareOp::Ne);
            }
            if mine {
                match &cmp.rhs {
                    Operand::Arg(_) | Operand::Null => true,
                    Operand::Column(path) => {
                        src.binds(path.head()) || available.contains(path.head())
                    }
                }
            } else {
                // Only a flip into "my column op earlier column" works.
                match &cmp.rhs {
                    Operand::Column(path) => {
                        src.binds(path.head())
                            && available.contains(cmp.column.head())
                            && cmp.op.flipped().is_some()
                    }
                    _ => false,
                }
            }
        }
    }
}

/// Rewrite one expressible conjunct into scanner form, allocating argument
/// slots for earlier-source columns as needed.
fn convert_conjunct(
    conjunct: &RowFilter,
    src_name: &str,
    names: &[String],
    is_full: bool,
    cx: &mut HoistCx,
    arg_sources: &mut BTreeSet<String>,
) -> DbResult<RowFilter> {
    let mut failed = None;
    let binds = |name: &str| names.iter().any(|n| n == name);

    let converted = conjunct.map_compares(&mut |cmp| {
        if cmp.column.is_simple() && binds(cmp.column.head()) {
            if is_full {
                // Member nullness is the union halves' business.
                return RowFilter::Compare(cmp.clone());
            }
            // Scanned rows are never null.
            return match cmp.op {
                CompareOp::Eq => RowFilter::False,
                _ => RowFilter::True,
            };
        }

        let mine = binds(cmp.column.head());
        let (column, op, rhs) = if mine {
            match &cmp.rhs {
                Operand::Arg(_) | Operand::Null => {
                    (cmp.column.clone(), cmp.op, cmp.rhs.clone())
                }
                Operand::Column(path) if binds(path.head()) => {
                    let rhs = if is_full {
                        Operand::Column(path.clone())
                    } else {
                        Operand::Column(strip_source(path, src_name))
                    };
                    (cmp.column.clone(), cmp.op, rhs)
                }
                Operand::Column(path) => {
                    match allocate_argument(cx, arg_sources, &cmp.column, path) {
                        Ok(arg) => (cmp.column.clone(), cmp.op, arg),
                        Err(err) => {
                            failed.get_or_insert(err);
                            return RowFilter::Compare(cmp.clone());
                        }
                    }
                }
            }
        } else {
            // Pre-checked: rhs is a column of this source and the operator
            // flips.
            let Operand::Column(local) = &cmp.rhs else {
                unreachable!("conjunct_expressible admitted a foreign leaf");
            };
            let op = cmp.op.flipped().unwrap_or(cmp.op);
            match allocate_argument(cx, arg_sources, local, &cmp.column) {
                Ok(arg) => (local.clone(), op, arg),
                Err(err) => {
                    failed.get_or_insert(err);
                    return RowFilter::Compare(cmp.clone());
                }
            }
        };

        let column = if is_full {
            column
        } else {
            strip_source(&column, src_name)
        };
        RowFilter::compare(column, op, rhs)
    });

    match failed {
        Some(err) => Err(err),
        None => Ok(converted),
    }
}

fn strip_source(path: &ColumnPath, source: &str) -> ColumnPath {
    path.strip_prefix(source).unwrap_or_else(|| path.clone())
}

/// Allocate a fresh argument slot fed by `producer_path`; negative when the
/// nullabilities of the two columns disagree, which tells the driver to
/// select the null-aware filter variant at bind time.
fn allocate_argument(
    cx: &mut HoistCx,
    arg_sources: &mut BTreeSet<String>,
    local_path: &ColumnPath,
    producer_path: &ColumnPath,
) -> DbResult<Operand> {
    let local_nullable = cx.layout.nullable(local_path)?;
    let producer_nullable = cx.layout.nullable(producer_path)?;
    let producer = cx
        .owner
        .get(producer_path.head())
        .cloned()
        .ok_or_else(|| DbError::UnknownColumn(producer_path.to_string()))?;

    let index = *cx.next_arg;
    *cx.next_arg += 1;

    cx.pending.push((
        producer.clone(),
        ArgAssignment {
            arg: index,
            path: producer_path.clone(),
        },
    ));
    arg_sources.insert(producer);

    let signed = if local_nullable != producer_nullable {
        -(index as i32)
    } else {
        index as i32
    };
    Ok(Operand::Arg(signed))
}

fn apply_assignments(node: &mut BNode, pending: Vec<(String, ArgAssignment)>) {
    fn install(node: &mut BNode, producer: &str, assignment: &ArgAssignment) {
        match node {
            BNode::Source(src) => {
                if src.name == producer {
                    src.assignments.push(assignment.clone());
                }
            }
            BNode::Join { left, right, .. } => {
                install(left, producer, assignment);
                install(right, producer, assignment);
            }
            BNode::Group(children) => {
                for child in children {
                    install(child, producer, assignment);
                }
            }
        }
    }
    for (producer, assignment) in &pending {
        install(node, producer, assignment);
    }
}

// ---------------------------------------------------------------------------
// Lowering to the planned tree.

fn lower(
    node: BNode,
    layout: &Arc<JoinLayout>,
    config: &PlannerConfig,
    next_arg: &mut u32,
) -> DbResult<PlannedNode> {
    match node {
        BNode::Group(children) => {
            let mut lowered = None;
            for child in children {
                let right = lower(child, layout, config, next_arg)?;
                lowered = Some(match lowered {
                    None => right,
                    Some(left) => PlannedNode::Join(Box::new(PlannedJoin {
                        ty: JoinType::Inner,
                        left,
                        right,
                        predicate: None,
                    })),
                });
            }
            lowered.ok_or_else(|| DbError::Syntax("empty inner-join group".into()))
        }
        BNode::Join { ty, left, right } => {
            let left = lower(*left, layout, config, next_arg)?;
            let right = lower(*right, layout, config, next_arg)?;
            let predicate = if matches!(ty, JoinType::LeftOuter | JoinType::LeftAnti) {
                let mut parts = Vec::new();
                collect_predicates(&right, &mut parts);
                let combined = RowFilter::and(parts);
                (!combined.is_true()).then_some(combined)
            } else {
                None
            };
            Ok(PlannedNode::Join(Box::new(PlannedJoin {
                ty,
                left,
                right,
                predicate,
            })))
        }
        BNode::Source(src) => {
            let slot = layout
                .index_of(&src.name)
                .ok_or_else(|| DbError::UnknownColumn(src.name.clone()))?;
            match src.kind {
                BKind::Col { table, schema } => {
                    let null_args = collect_null_args(src.filter.as_ref());
                    Ok(PlannedNode::Column(PlannedColumn {
                        name: src.name,
                        table,
                        schema,
                        slot,
                        filter: src.filter,
                        null_args,
                        remainder: src.remainder,
                        predicate: src.predicate,
                        assignments: src.assignments,
                        arg_sources: src.arg_sources.into_iter().collect(),
                        exists_probe: false,
                    }))
                }
                BKind::Full { op } => {
                    let (first_op, second_op) = try_split_full_join(&op)?;
                    let sub_query = src.filter.clone().unwrap_or(RowFilter::True);
                    let first = plan_tree(
                        SpecNode::Join(Box::new(first_op)),
                        sub_query.clone(),
                        config,
                        next_arg,
                    )?;
                    let second = plan_tree(
                        SpecNode::Join(Box::new(second_op)),
                        sub_query,
                        config,
                        next_arg,
                    )?;
                    Ok(PlannedNode::Full(Box::new(PlannedFullJoin {
                        name: src.name,
                        slot,
                        layout: first.layout.clone(),
                        first: Arc::new(first),
                        second: Arc::new(second),
                        remainder: src.remainder,
                        predicate: src.predicate,
                        assignments: src.assignments,
                        arg_sources: src.arg_sources.into_iter().collect(),
                    })))
                }
            }
        }
    }
}

fn collect_null_args(filter: Option<&RowFilter>) -> Vec<u32> {
    let mut out = BTreeSet::new();
    if let Some(filter) = filter {
        filter.for_each_compare(&mut |cmp| {
            if let Operand::Arg(n) = cmp.rhs {
                if n < 0 {
                    out.insert(n.unsigned_abs());
                }
            }
        });
    }
    out.into_iter().collect()
}

fn collect_predicates(node: &PlannedNode, out: &mut Vec<RowFilter>) {
    match node {
        PlannedNode::Column(col) => out.extend(col.predicate.clone()),
        PlannedNode::Full(full) => out.extend(full.predicate.clone()),
        PlannedNode::Join(join) => {
            collect_predicates(&join.left, out);
            collect_predicates(&join.right, out);
        }
    }
}

/// Mark the left-anti last-source optimization: when nothing comes after the
/// anti level and it needs no remainder or assignments, the driver can ask
/// `any_rows` instead of opening a scanner.
fn mark_exists_probe(root: &mut PlannedNode) {
    fn last_source(node: &PlannedNode) -> &str {
        match node {
            PlannedNode::Column(col) => &col.name,
            PlannedNode::Full(full) => &full.name,
            PlannedNode::Join(join) => last_source(&join.right),
        }
    }
    let last = last_source(root).to_string();

    fn walk(node: &mut PlannedNode, last: &str) {
        if let PlannedNode::Join(join) = node {
            walk(&mut join.left, last);
            walk(&mut join.right, last);
            if join.ty == JoinType::LeftAnti {
                if let PlannedNode::Column(col) = &mut join.right {
                    if col.name == last
                        && col.remainder.is_none()
                        && col.assignments.is_empty()
                    {
                        col.exists_probe = true;
                    }
                }
            }
        }
    }
    walk(root, &last);
}

// ---------------------------------------------------------------------------
// Plan description.

impl PlannedSpec {
    /// The scanner-facing filter text for a planned column, with the
    /// planner's negative argument flags flipped back to plain indices.
    pub fn scanner_filter_text(filter: &RowFilter) -> String {
        filter.replace_arguments(&|n| n.abs()).to_string()
    }

    /// Build the diagnostic plan tree for this planned query.
    pub fn query_plan(&self) -> DbResult<QueryPlan> {
        let mut levels = Vec::new();
        describe(&self.root, None, &mut levels)?;
        let mut result = QueryPlan::NestedLoopsJoin { levels };
        if !self.residual.is_true() {
            result = QueryPlan::Filter {
                filter: self.residual.to_string(),
                source: Box::new(result),
            };
        }
        Ok(result)
    }
}

fn describe(
    node: &PlannedNode,
    join_type: Option<&'static str>,
    levels: &mut Vec<Level>,
) -> DbResult<()> {
    match node {
        PlannedNode::Column(col) => {
            let mut source = match &col.filter {
                Some(filter) if filter.is_false() => QueryPlan::Empty,
                Some(filter) => col
                    .table
                    .scanner_plan(Some(&PlannedSpec::scanner_filter_text(filter)), &[])?,
                None => col.table.scanner_plan(None, &[])?,
            };
            if let Some(remainder) = &col.remainder {
                source = QueryPlan::Filter {
                    filter: remainder.to_string(),
                    source: Box::new(source),
                };
            }
            if col.exists_probe {
                source = QueryPlan::Exists {
                    source: Box::new(source),
                };
            }
            levels.push(Level {
                join_type: join_type.map(String::from),
                source,
                assignments: col.assignments.iter().map(ArgAssignment::display).collect(),
            });
            Ok(())
        }
        PlannedNode::Full(full) => {
            let mut source = QueryPlan::DisjointUnion {
                sources: vec![full.first.query_plan()?, full.second.query_plan()?],
            };
            if let Some(remainder) = &full.remainder {
                source = QueryPlan::Filter {
                    filter: remainder.to_string(),
                    source: Box::new(source),
                };
            }
            levels.push(Level {
                join_type: join_type.map(String::from),
                source,
                assignments: full
                    .assignments
                    .iter()
                    .map(ArgAssignment::display)
                    .collect(),
            });
            Ok(())
        }
        PlannedNode::Join(join) => {
            describe(&join.left, join_type, levels)?;
            describe(&join.right, Some(join.ty.label()), levels)
        }
    }
}
