//! Test support utilities for the join workspace.
//!
//! This crate provides the shared testing infrastructure:
//! - The P/Q reference tables used throughout the join test suites
//! - A scanner-counting table wrapper for resource-leak assertions
//! - Row and value construction macros
//! - Cursor draining and multiset assertion helpers
//! - Property-based generators for filter text
//!
//! # Example Usage
//!
//! ```no_run
//! use testsupport::prelude::*;
//!
//! let table = open_pq("p : q");
//! let rows = drain(table.new_scanner(no_txn(), Some("p.id == q.pid"), &[]).unwrap());
//! assert_eq!(rows.len(), 3);
//! ```

pub mod assertions;
pub mod fixtures;
pub mod macros;
pub mod proptest_generators;
pub mod tracking;

/// Convenient re-exports for common testing patterns.
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::fixtures::*;
    pub use crate::tracking::*;
}
