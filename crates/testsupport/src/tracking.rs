//! A table wrapper that counts open scanners, for leak assertions.

use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, Ordering};

use catalog::RowSchema;
use common::{DbResult, Row};
use plan::QueryPlan;
use storage::{Cardinality, Scanner, Table, Transaction};
use types::Value;
use uuid::Uuid;

/// Handle onto the number of scanners a `tracking` wrapper currently holds
/// open.
#[derive(Clone)]
pub struct ScannerCounter(Arc<AtomicIsize>);

impl ScannerCounter {
    pub fn open(&self) -> isize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wrap a table so every scanner it opens is counted until closed.
pub fn tracking(inner: Arc<dyn Table>) -> (Arc<dyn Table>, ScannerCounter) {
    let counter = Arc::new(AtomicIsize::new(0));
    let table = Arc::new(TrackingTable {
        inner,
        open: counter.clone(),
    });
    (table, ScannerCounter(counter))
}

struct TrackingTable {
    inner: Arc<dyn Table>,
    open: Arc<AtomicIsize>,
}

impl Table for TrackingTable {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn schema(&self) -> &Arc<RowSchema> {
        self.inner.schema()
    }

    fn token(&self) -> Uuid {
        self.inner.token()
    }

    fn cardinality(&self) -> Cardinality {
        self.inner.cardinality()
    }

    fn is_empty(&self) -> DbResult<bool> {
        self.inner.is_empty()
    }

    fn new_scanner(
        &self,
        txn: &dyn Transaction,
        filter: Option<&str>,
        args: &[Value],
    ) -> DbResult<Box<dyn Scanner>> {
        let inner = self.inner.new_scanner(txn, filter, args)?;
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(TrackingScanner {
            inner,
            open: self.open.clone(),
            closed: false,
        }))
    }

    fn any_rows(
        &self,
        txn: &dyn Transaction,
        filter: Option<&str>,
        args: &[Value],
    ) -> DbResult<bool> {
        self.inner.any_rows(txn, filter, args)
    }

    fn scanner_plan(&self, filter: Option<&str>, args: &[Value]) -> DbResult<QueryPlan> {
        self.inner.scanner_plan(filter, args)
    }
}

struct TrackingScanner {
    inner: Box<dyn Scanner>,
    open: Arc<AtomicIsize>,
    closed: bool,
}

impl TrackingScanner {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Scanner for TrackingScanner {
    fn row(&self) -> Option<&Row> {
        self.inner.row()
    }

    fn step(&mut self) -> DbResult<()> {
        self.inner.step()
    }

    fn close(&mut self) {
        self.inner.close();
        self.release();
    }
}

impl Drop for TrackingScanner {
    fn drop(&mut self) {
        self.release();
    }
}
