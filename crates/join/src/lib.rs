//! The join front door.
//!
//! A `JoinTable` binds one parsed join specification to its table handles
//! and hands out streaming cursors per query:
//!
//! ```text
//! JoinTable::open(spec text, join schema, table handles)
//!     ↓
//! new_scanner(txn, query, args)
//!     ↓  (launcher cached per canonical query text)
//! plan once → JoinCursor streams joined rows
//! ```
//!
//! A spec whose root is a full join is split into a left-outer and a
//! right-anti plan and served as a disjoint union. Launchers are cached
//! process-wide under weak references keyed by canonical spec text, canonical
//! query text, and the table identity tokens, so equivalent queries that
//! differ only in formatting share one compiled plan.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use ahash::RandomState;
use catalog::JoinSchema;
use common::{DbError, DbResult};
use executor::{JoinRow, JoinScanner, UnionCursor};
use filter::RowFilter;
use hashbrown::HashMap;
use plan::QueryPlan;
use planner::{PlannedSpec, PlannerConfig, plan};
use spec::{JoinSpec, SpecNode, try_split_full_join};
use storage::{Table, Transaction};
use types::Value;
use uuid::Uuid;

/// A readable join over row tables. Read-only by nature: every mutating
/// operation fails with `DbError::Unmodifiable`.
pub struct JoinTable {
    spec: Arc<JoinSpec>,
    spec_text: String,
    tokens: Vec<Uuid>,
    config: PlannerConfig,
}

impl JoinTable {
    /// Parse a join spec and bind its columns to the supplied tables.
    pub fn open(
        spec_text: &str,
        schema: Arc<JoinSchema>,
        tables: Vec<Arc<dyn Table>>,
    ) -> DbResult<JoinTable> {
        Self::open_with_config(spec_text, schema, tables, PlannerConfig::default())
    }

    pub fn open_with_config(
        spec_text: &str,
        schema: Arc<JoinSchema>,
        tables: Vec<Arc<dyn Table>>,
        config: PlannerConfig,
    ) -> DbResult<JoinTable> {
        let tokens = tables.iter().map(|t| t.token()).collect();
        let spec = Arc::new(JoinSpec::parse(spec_text, schema, &tables)?);
        let spec_text = spec.to_string();
        Ok(JoinTable {
            spec,
            spec_text,
            tokens,
            config,
        })
    }

    pub fn spec(&self) -> &Arc<JoinSpec> {
        &self.spec
    }

    /// Canonical form of the spec text.
    pub fn spec_text(&self) -> &str {
        &self.spec_text
    }

    /// Would this join yield no rows regardless of the query?
    pub fn is_empty(&self) -> DbResult<bool> {
        self.spec.is_empty()
    }

    /// Open a streaming cursor for one query. `None` scans everything.
    pub fn new_scanner(
        &self,
        txn: Arc<dyn Transaction>,
        query: Option<&str>,
        args: &[Value],
    ) -> DbResult<JoinCursor> {
        self.launcher(query)?.new_scanner(txn, args)
    }

    /// Diagnostic plan for one query.
    pub fn query_plan(&self, query: Option<&str>) -> DbResult<QueryPlan> {
        self.launcher(query)?.query_plan()
    }

    pub fn load(&self, _txn: &dyn Transaction, _row: &mut JoinRow) -> DbResult<()> {
        Err(DbError::Unmodifiable)
    }

    pub fn exists(&self, _txn: &dyn Transaction, _row: &JoinRow) -> DbResult<bool> {
        Err(DbError::Unmodifiable)
    }

    pub fn store(&self, _txn: &dyn Transaction, _row: &JoinRow) -> DbResult<()> {
        Err(DbError::Unmodifiable)
    }

    pub fn delete(&self, _txn: &dyn Transaction, _row: &JoinRow) -> DbResult<()> {
        Err(DbError::Unmodifiable)
    }

    /// Fetch or build the launcher for one query. The query text is
    /// canonicalized by a round trip through the filter parser before it
    /// keys the cache.
    fn launcher(&self, query: Option<&str>) -> DbResult<Arc<Launcher>> {
        let filter = match query {
            Some(text) => RowFilter::parse(text)?,
            None => RowFilter::True,
        };
        let key = LauncherKey {
            spec: self.spec_text.clone(),
            query: filter.to_string(),
            tables: self.tokens.clone(),
        };

        let cache = launcher_cache();
        if let Some(found) = cache.lock().unwrap().get(&key).and_then(Weak::upgrade) {
            return Ok(found);
        }

        let launcher = Arc::new(self.build_launcher(&filter)?);
        let mut cache = cache.lock().unwrap();
        if cache.len() >= CACHE_SWEEP_LEN {
            cache.retain(|_, weak| weak.strong_count() > 0);
        }
        cache.insert(key, Arc::downgrade(&launcher));
        Ok(launcher)
    }

    fn build_launcher(&self, filter: &RowFilter) -> DbResult<Launcher> {
        let kind = match self.spec.root() {
            SpecNode::FullJoin(fj) => {
                let (first_op, second_op) = try_split_full_join(&fj.op)?;
                let schema = self.spec.schema().clone();
                let first_spec =
                    JoinSpec::from_root(SpecNode::Join(Box::new(first_op)), schema.clone());
                let second_spec =
                    JoinSpec::from_root(SpecNode::Join(Box::new(second_op)), schema);
                LauncherKind::Union(
                    Arc::new(plan(&first_spec, filter, &self.config)?),
                    Arc::new(plan(&second_spec, filter, &self.config)?),
                )
            }
            _ => LauncherKind::Loops(Arc::new(plan(&self.spec, filter, &self.config)?)),
        };
        Ok(Launcher { kind })
    }
}

const CACHE_SWEEP_LEN: usize = 256;

#[derive(Clone, PartialEq, Eq, Hash)]
struct LauncherKey {
    spec: String,
    query: String,
    tables: Vec<Uuid>,
}

type LauncherCache = Mutex<HashMap<LauncherKey, Weak<Launcher>, RandomState>>;

fn launcher_cache() -> &'static LauncherCache {
    static CACHE: OnceLock<LauncherCache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::default()))
}

enum LauncherKind {
    Loops(Arc<PlannedSpec>),
    Union(Arc<PlannedSpec>, Arc<PlannedSpec>),
}

/// Compiled artifacts for one (spec, query) pair.
struct Launcher {
    kind: LauncherKind,
}

impl Launcher {
    fn new_scanner(&self, txn: Arc<dyn Transaction>, args: &[Value]) -> DbResult<JoinCursor> {
        match &self.kind {
            LauncherKind::Loops(planned) => Ok(JoinCursor::Loops(JoinScanner::new(
                planned.clone(),
                txn,
                None,
                args,
            )?)),
            LauncherKind::Union(first, second) => {
                let a = JoinScanner::new(first.clone(), txn.clone(), None, args)?;
                let b = JoinScanner::new(second.clone(), txn, None, args)?;
                Ok(JoinCursor::Union(UnionCursor::new(a, b)))
            }
        }
    }

    fn query_plan(&self) -> DbResult<QueryPlan> {
        match &self.kind {
            LauncherKind::Loops(planned) => planned.query_plan(),
            LauncherKind::Union(first, second) => Ok(QueryPlan::DisjointUnion {
                sources: vec![first.query_plan()?, second.query_plan()?],
            }),
        }
    }
}

/// Streaming cursor over joined rows: a plain nested-loops scanner, or the
/// disjoint union serving a root-level full join.
pub enum JoinCursor {
    Loops(JoinScanner),
    Union(UnionCursor),
}

impl std::fmt::Debug for JoinCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JoinCursor::Loops(_) => f.write_str("JoinCursor::Loops(..)"),
            JoinCursor::Union(_) => f.write_str("JoinCursor::Union(..)"),
        }
    }
}

impl JoinCursor {
    pub fn row(&self) -> Option<&JoinRow> {
        match self {
            JoinCursor::Loops(scanner) => scanner.row(),
            JoinCursor::Union(cursor) => cursor.row(),
        }
    }

    pub fn step(&mut self) -> DbResult<Option<&JoinRow>> {
        match self {
            JoinCursor::Loops(scanner) => scanner.step(),
            JoinCursor::Union(cursor) => {
                cursor.step()?;
                Ok(cursor.row())
            }
        }
    }

    pub fn step_with(&mut self, row: JoinRow) -> DbResult<Option<&JoinRow>> {
        match self {
            JoinCursor::Loops(scanner) => scanner.step_with(row),
            JoinCursor::Union(cursor) => {
                cursor.step_with(row)?;
                Ok(cursor.row())
            }
        }
    }

    pub fn close(&mut self) {
        match self {
            JoinCursor::Loops(scanner) => scanner.close(),
            JoinCursor::Union(cursor) => cursor.close(),
        }
    }
}
