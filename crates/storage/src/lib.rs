//! Storage collaborator surface for the join subsystem.
//!
//! The join driver never touches pages or encodings; it consumes tables
//! through the small `Table`/`Scanner` traits below. `MemTable` is the
//! in-memory implementation used by embedders and the test suite.

mod mem;

pub use mem::{MemTable, compare_values, matches_row};

use std::sync::Arc;

use catalog::RowSchema;
use common::{DbResult, Row};
use plan::QueryPlan;
use types::Value;
use uuid::Uuid;

/// Opaque transaction handle threaded through scanner calls. Lifecycle is
/// controlled by the caller.
pub trait Transaction: Send + Sync {}

/// Transaction handle for embedders that do not isolate reads.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTxn;

impl Transaction for NoTxn {}

/// Streaming iterator over table rows. A freshly opened scanner is already
/// positioned on its first row; `step` advances past it.
pub trait Scanner {
    fn row(&self) -> Option<&Row>;
    fn step(&mut self) -> DbResult<()>;
    fn close(&mut self);
}

impl std::fmt::Debug for dyn Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Scanner").finish_non_exhaustive()
    }
}

/// Coarse cardinality hint used when ordering inner joins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cardinality {
    Many,
    Grouped,
    AtMostOne,
}

/// One scannable table, as seen by the join subsystem.
///
/// `filter` arguments are filter text in the row-filter grammar, with column
/// names relative to this table's rows; `None` scans everything.
pub trait Table: Send + Sync {
    fn name(&self) -> &str;

    fn schema(&self) -> &Arc<RowSchema>;

    /// Stable identity used to key plan caches.
    fn token(&self) -> Uuid;

    fn cardinality(&self) -> Cardinality {
        Cardinality::Many
    }

    /// Fast emptiness check used by the spec tree's static analysis.
    fn is_empty(&self) -> DbResult<bool>;

    fn new_scanner(
        &self,
        txn: &dyn Transaction,
        filter: Option<&str>,
        args: &[Value],
    ) -> DbResult<Box<dyn Scanner>>;

    /// Does any row match? Fast path for the anti-join probe.
    fn any_rows(
        &self,
        txn: &dyn Transaction,
        filter: Option<&str>,
        args: &[Value],
    ) -> DbResult<bool>;

    /// Describe what a scanner opened with this filter would do.
    fn scanner_plan(&self, filter: Option<&str>, args: &[Value]) -> DbResult<QueryPlan>;
}
